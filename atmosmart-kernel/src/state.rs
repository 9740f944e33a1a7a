use crate::models::{ChannelSnapshot, LatestReadings, MetricReading};
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Latest snapshot per channel. Pollers replace a channel's snapshot whole;
/// readers always see either the previous or the new snapshot, never a mix.
#[derive(Clone, Default)]
pub struct ReadingStore {
    inner: Shared<LatestReadings>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, snapshot: ChannelSnapshot) {
        self.inner.lock().insert(snapshot.channel.clone(), snapshot);
    }

    pub fn snapshot(&self, channel: &str) -> Option<ChannelSnapshot> {
        self.inner.lock().get(channel).cloned()
    }

    /// All snapshots, ordered by channel name.
    pub fn snapshots(&self) -> Vec<ChannelSnapshot> {
        let mut all: Vec<ChannelSnapshot> = self.inner.lock().values().cloned().collect();
        all.sort_by(|a, b| a.channel.cmp(&b.channel));
        all
    }

    /// Every channel's readings flattened, ordered by metric key.
    pub fn current_readings(&self) -> Vec<MetricReading> {
        let mut readings: Vec<MetricReading> = self
            .inner
            .lock()
            .values()
            .flat_map(|snapshot| snapshot.readings.iter().cloned())
            .collect();
        readings.sort_by(|a, b| a.metric_key.cmp(&b.metric_key));
        readings
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().len()
    }
}
