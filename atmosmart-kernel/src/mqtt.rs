/**
 * MQTT - Publication de l'état de conformité AtmoSmart
 *
 * RÔLE : à intervalle fixe, évalue les dernières lectures et publie
 * l'état de l'installation + la liste d'alertes sur le bus.
 *
 * TOPICS :
 * - atmosmart/facility/status@v1 : FacilitySnapshot
 * - atmosmart/facility/alerts@v1 : AlertsEvent
 *
 * Désactivé quand la config n'a pas de section `mqtt`.
 */

use crate::alerts::AlertGenerator;
use crate::compliance::{FacilityEvaluation, MetricStatus};
use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::models::{Alert, ComplianceStatus, MetricReading, RegulatoryLimit};
use crate::state::ReadingStore;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const STATUS_TOPIC: &str = "atmosmart/facility/status@v1";
pub const ALERTS_TOPIC: &str = "atmosmart/facility/alerts@v1";

/// Destination for facility events.
pub trait EventSink: Send + Sync {
    fn emit(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl EventSink for AsyncClient {
    async fn emit(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FacilitySnapshot {
    pub site_id: String,
    pub timestamp: String,
    pub facility_status: ComplianceStatus,
    pub dominant_metric: Option<String>,
    pub metrics: Vec<MetricStatus>,
    pub readings: Vec<MetricReading>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsEvent {
    pub site_id: String,
    pub timestamp: String,
    pub alerts: Vec<Alert>,
}

#[derive(Clone)]
pub struct StatusPublisher {
    site_id: String,
    limits: Vec<RegulatoryLimit>,
    alerts: AlertGenerator,
    store: ReadingStore,
    health: HealthTracker,
}

impl StatusPublisher {
    pub fn new(
        site_id: &str,
        limits: Vec<RegulatoryLimit>,
        alerts: AlertGenerator,
        store: ReadingStore,
        health: HealthTracker,
    ) -> Self {
        Self {
            site_id: site_id.to_string(),
            limits,
            alerts,
            store,
            health,
        }
    }

    /// Evaluate the current readings and emit both events.
    pub async fn publish_once<S: EventSink>(&self, sink: &S) -> anyhow::Result<FacilitySnapshot> {
        let readings = self.store.current_readings();
        let evaluation = FacilityEvaluation::from_readings(&readings, &self.limits);
        let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();

        let alerts = AlertsEvent {
            site_id: self.site_id.clone(),
            timestamp: timestamp.clone(),
            alerts: self.alerts.generate(&readings),
        };
        let snapshot = FacilitySnapshot {
            site_id: self.site_id.clone(),
            timestamp,
            facility_status: evaluation.facility_status,
            dominant_metric: evaluation.dominant_metric,
            metrics: evaluation.metrics,
            readings,
        };

        sink.emit(STATUS_TOPIC, serde_json::to_vec(&snapshot)?).await?;
        sink.emit(ALERTS_TOPIC, serde_json::to_vec(&alerts)?).await?;
        debug!(
            status = %snapshot.facility_status,
            alerts = alerts.alerts.len(),
            "facility events published"
        );
        Ok(snapshot)
    }

    pub fn spawn(self, conf: MqttConf, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut opts = MqttOptions::new("atmosmart-kernel", &conf.host, conf.port);
            opts.set_keep_alive(Duration::from_secs(15));
            let (client, mut eventloop) = AsyncClient::new(opts, 10);
            self.health.mark_mqtt_connecting();
            info!(host = %conf.host, port = conf.port, "MQTT publisher started");

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.publish_once(&client).await {
                            warn!(error = %e, "failed to publish facility events");
                        }
                    },
                    event = eventloop.poll() => {
                        match event {
                            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                                self.health.mark_mqtt_connected();
                                info!("MQTT connected");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = ?e, "MQTT error");
                                self.health.increment_reconnects();
                                tokio::time::sleep(Duration::from_secs(2)).await;
                            }
                        }
                    }
                }
            }
        })
    }
}
