/**
 * HEALTH - État de fonctionnement du kernel AtmoSmart
 *
 * RÔLE : compteurs de polling (live vs synthétique), replis narration,
 * statut du bus MQTT. Exposé via GET /system/health.
 *
 * Les compteurs synthétiques rendent visible toute panne masquée par le
 * repli sur données simulées.
 */

use crate::models::ReadingSource;
use crate::state::ReadingStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub channels_tracked: u32,
    pub live_polls: u64,
    pub synthetic_polls: u64,
    /// True when at least one channel currently serves synthetic readings.
    pub serving_synthetic: bool,
    pub narration_requests: u64,
    pub narration_fallbacks: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    live_polls: Arc<AtomicU64>,
    synthetic_polls: Arc<AtomicU64>,
    narration_requests: Arc<AtomicU64>,
    narration_fallbacks: Arc<AtomicU64>,
    mqtt_reconnects: Arc<AtomicU64>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            live_polls: Arc::new(AtomicU64::new(0)),
            synthetic_polls: Arc::new(AtomicU64::new(0)),
            narration_requests: Arc::new(AtomicU64::new(0)),
            narration_fallbacks: Arc::new(AtomicU64::new(0)),
            mqtt_reconnects: Arc::new(AtomicU64::new(0)),
            mqtt_status: Arc::new(Mutex::new("disabled".to_string())),
        }
    }

    pub fn record_poll(&self, source: ReadingSource) {
        let counter = match source {
            ReadingSource::Live => &self.live_polls,
            ReadingSource::Synthetic => &self.synthetic_polls,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_narration(&self, fell_back: bool) {
        self.narration_requests.fetch_add(1, Ordering::Relaxed);
        if fell_back {
            self.narration_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn live_polls(&self) -> u64 {
        self.live_polls.load(Ordering::Relaxed)
    }

    pub fn synthetic_polls(&self) -> u64 {
        self.synthetic_polls.load(Ordering::Relaxed)
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, store: &ReadingStore) -> KernelHealth {
        let snapshots = store.snapshots();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            channels_tracked: snapshots.len() as u32,
            live_polls: self.live_polls(),
            synthetic_polls: self.synthetic_polls(),
            serving_synthetic: snapshots.iter().any(|s| s.source == ReadingSource::Synthetic),
            narration_requests: self.narration_requests.load(Ordering::Relaxed),
            narration_fallbacks: self.narration_fallbacks.load(Ordering::Relaxed),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}
