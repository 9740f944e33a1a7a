//! Telemetry reader for ThingSpeak-style channels.
//!
//! A channel exposes its last entry as a JSON object whose `field<N>` keys
//! carry string-encoded numbers. Reading a channel never fails from the
//! caller's point of view: any fetch or parse error is logged and replaced
//! by synthetic readings tagged as such.

use crate::catalog;
use crate::config::ChannelConf;
use crate::health::HealthTracker;
use crate::models::{ChannelSnapshot, MetricReading, ReadingSource};
use crate::state::ReadingStore;
use crate::synthetic::SyntheticSource;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Field number -> value. NaN for null or unparsable fields.
pub type FieldMap = BTreeMap<u8, f64>;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider answered {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Extract `field1`..`field8` from a last-entry object.
pub fn parse_fields(body: &Value) -> Result<FieldMap, TelemetryError> {
    let obj = body
        .as_object()
        .ok_or_else(|| TelemetryError::Payload(format!("expected an object, got {body}")))?;

    let mut fields = FieldMap::new();
    for (key, value) in obj {
        let Some(n) = key.strip_prefix("field").and_then(|n| n.parse::<u8>().ok()) else {
            continue;
        };
        let parsed = match value {
            Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            _ => f64::NAN,
        };
        fields.insert(n, parsed);
    }
    Ok(fields)
}

#[derive(Clone, Default)]
pub struct TelemetryReader {
    client: reqwest::Client,
}

impl TelemetryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-entry URL without credentials; the read key travels as a query pair.
    pub fn last_entry_url(channel: &ChannelConf) -> String {
        format!(
            "{}/channels/{}/feeds/last.json",
            channel.base_url.trim_end_matches('/'),
            channel.channel_id
        )
    }

    pub async fn fetch_latest(&self, channel: &ChannelConf) -> Result<FieldMap, TelemetryError> {
        let mut request = self
            .client
            .get(Self::last_entry_url(channel))
            .timeout(Duration::from_secs(channel.timeout_secs));
        if let Some(key) = &channel.read_api_key {
            request = request.query(&[("api_key", key)]);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(TelemetryError::Status(response.status()));
        }

        let text = response.text().await?;
        let body: Value =
            serde_json::from_str(&text).map_err(|e| TelemetryError::Payload(e.to_string()))?;
        parse_fields(&body)
    }

    /// Latest snapshot for `channel`, synthesized when the provider cannot be read.
    pub async fn read_channel(
        &self,
        channel: &ChannelConf,
        synthetic: &mut SyntheticSource,
    ) -> ChannelSnapshot {
        let (readings, source) = match self.fetch_latest(channel).await {
            Ok(fields) => {
                let readings = channel
                    .fields
                    .iter()
                    .map(|(n, key)| {
                        let value = fields.get(n).copied().unwrap_or(f64::NAN);
                        MetricReading::new(key, value, catalog::unit_of(key), ReadingSource::Live)
                    })
                    .collect();
                (readings, ReadingSource::Live)
            }
            Err(e) => {
                warn!(
                    channel = %channel.name,
                    error = %e,
                    "telemetry fetch failed, serving SYNTHETIC readings"
                );
                let keys: Vec<&String> = channel.fields.values().collect();
                (synthetic.readings(&keys), ReadingSource::Synthetic)
            }
        };

        ChannelSnapshot {
            channel: channel.name.clone(),
            readings,
            fetched_at: OffsetDateTime::now_utc(),
            source,
        }
    }
}

/// One polling task per channel. Each task replaces its channel's snapshot as
/// a whole; a slow channel never delays the others. Missed ticks are skipped.
pub fn spawn_pollers(
    reader: TelemetryReader,
    channels: Vec<ChannelConf>,
    period: Duration,
    seed: Option<u64>,
    store: ReadingStore,
    health: HealthTracker,
) -> Vec<JoinHandle<()>> {
    channels
        .into_iter()
        .enumerate()
        .map(|(idx, channel)| {
            let reader = reader.clone();
            let store = store.clone();
            let health = health.clone();
            tokio::spawn(async move {
                let mut synthetic = SyntheticSource::new(seed.map(|s| s.wrapping_add(idx as u64)));
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let snapshot = reader.read_channel(&channel, &mut synthetic).await;
                    health.record_poll(snapshot.source);
                    debug!(channel = %channel.name, source = ?snapshot.source, "channel polled");
                    store.replace(snapshot);
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmosmart_devkit::{ChannelFeedBuilder, ProviderStub, StubResponse, TestHarness};

    fn channel(base_url: &str) -> ChannelConf {
        ChannelConf {
            name: "air".into(),
            channel_id: "3234017".into(),
            base_url: base_url.into(),
            read_api_key: None,
            fields: BTreeMap::from([
                (2, "AQI".to_string()),
                (4, "FILTER".to_string()),
                (7, "TEMP".to_string()),
                (8, "HUMIDITY".to_string()),
            ]),
            timeout_secs: 2,
        }
    }

    fn value_of(snapshot: &ChannelSnapshot, key: &str) -> f64 {
        snapshot.readings.iter().find(|r| r.metric_key == key).unwrap().value
    }

    #[test]
    fn parse_string_encoded_fields() {
        let body = serde_json::json!({
            "created_at": "2025-01-01T00:00:00Z",
            "entry_id": 12,
            "field1": "1.25",
            "field2": " 42 ",
            "field3": null,
            "field4": "n/a",
            "field5": 7
        });
        let fields = parse_fields(&body).unwrap();
        assert_eq!(fields.get(&1), Some(&1.25));
        assert_eq!(fields.get(&2), Some(&42.0));
        assert!(fields[&3].is_nan());
        assert!(fields[&4].is_nan());
        assert_eq!(fields.get(&5), Some(&7.0));
        assert_eq!(fields.len(), 5);
    }

    #[test]
    fn parse_rejects_non_objects() {
        // an empty channel answers with a bare -1
        assert!(matches!(parse_fields(&serde_json::json!(-1)), Err(TelemetryError::Payload(_))));
    }

    #[test]
    fn url_never_carries_the_read_key() {
        let mut ch = channel("https://api.thingspeak.com/");
        ch.read_api_key = Some("RKEY".into());
        assert_eq!(
            TelemetryReader::last_entry_url(&ch),
            "https://api.thingspeak.com/channels/3234017/feeds/last.json"
        );
    }

    #[tokio::test]
    async fn live_feed_maps_fields_to_metrics() {
        let stub = ProviderStub::start().await.unwrap();
        stub.respond_with(StubResponse::Json(
            ChannelFeedBuilder::new(1)
                .field(2, 42.5)
                .field(4, 85.0)
                .null_field(7)
                .build(),
        ));

        let reader = TelemetryReader::new();
        let mut synthetic = SyntheticSource::new(Some(1));
        let snapshot = reader.read_channel(&channel(&stub.base_url()), &mut synthetic).await;

        assert_eq!(snapshot.source, ReadingSource::Live);
        assert_eq!(value_of(&snapshot, "AQI"), 42.5);
        assert_eq!(value_of(&snapshot, "FILTER"), 85.0);
        assert!(value_of(&snapshot, "TEMP").is_nan());
        assert!(value_of(&snapshot, "HUMIDITY").is_nan());
        let temp = snapshot.readings.iter().find(|r| r.metric_key == "TEMP").unwrap();
        assert_eq!(temp.unit, "°C");
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn read_key_is_forwarded_encoded() {
        let harness = TestHarness::new().with_provider().await.unwrap();
        let stub = harness.provider().unwrap();
        stub.respond_with(StubResponse::Json(ChannelFeedBuilder::new(1).field(2, 10.0).build()));
        let mut ch = channel(&stub.base_url());

        ch.read_api_key = Some("SECRET".into());
        TelemetryReader::new().fetch_latest(&ch).await.unwrap();
        assert_eq!(stub.last_query().as_deref(), Some("api_key=SECRET"));

        ch.read_api_key = Some("a&b#c".into());
        TelemetryReader::new().fetch_latest(&ch).await.unwrap();
        assert_eq!(stub.last_query().as_deref(), Some("api_key=a%26b%23c"));
        assert_eq!(stub.last_path().as_deref(), Some("/channels/3234017/feeds/last.json"));
    }

    #[tokio::test]
    async fn server_error_falls_back_to_synthetic() {
        let stub = ProviderStub::start().await.unwrap();
        stub.respond_with(StubResponse::Status(500));

        let reader = TelemetryReader::new();
        let ch = channel(&stub.base_url());
        assert!(matches!(reader.fetch_latest(&ch).await, Err(TelemetryError::Status(_))));

        let mut synthetic = SyntheticSource::new(Some(1));
        let snapshot = reader.read_channel(&ch, &mut synthetic).await;
        assert_eq!(snapshot.source, ReadingSource::Synthetic);
        assert_eq!(snapshot.readings.len(), 4);
        assert!(snapshot
            .readings
            .iter()
            .all(|r| r.source == ReadingSource::Synthetic && r.is_available()));
    }

    #[tokio::test]
    async fn malformed_body_falls_back_to_synthetic() {
        let stub = ProviderStub::start().await.unwrap();
        stub.respond_with(StubResponse::Raw("<html>maintenance</html>".into()));

        let reader = TelemetryReader::new();
        let ch = channel(&stub.base_url());
        assert!(matches!(reader.fetch_latest(&ch).await, Err(TelemetryError::Payload(_))));

        let mut synthetic = SyntheticSource::new(Some(1));
        assert_eq!(reader.read_channel(&ch, &mut synthetic).await.source, ReadingSource::Synthetic);
    }

    #[tokio::test]
    async fn unreachable_provider_falls_back_to_synthetic() {
        let reader = TelemetryReader::new();
        let mut synthetic = SyntheticSource::new(Some(1));
        let snapshot = reader.read_channel(&channel("http://127.0.0.1:9"), &mut synthetic).await;
        assert_eq!(snapshot.source, ReadingSource::Synthetic);
    }

    #[tokio::test]
    async fn pollers_replace_channel_snapshots() {
        let stub = ProviderStub::start().await.unwrap();
        stub.respond_with(StubResponse::Json(ChannelFeedBuilder::new(1).field(2, 30.0).build()));

        let store = ReadingStore::new();
        let health = HealthTracker::new();
        let handles = spawn_pollers(
            TelemetryReader::new(),
            vec![channel(&stub.base_url())],
            Duration::from_millis(100),
            Some(5),
            store.clone(),
            health.clone(),
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(value_of(&store.snapshot("air").unwrap(), "AQI"), 30.0);

        stub.respond_with(StubResponse::Json(ChannelFeedBuilder::new(2).field(2, 31.0).build()));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(value_of(&store.snapshot("air").unwrap(), "AQI"), 31.0);
        assert_eq!(store.channel_count(), 1);
        assert!(health.live_polls() >= 2);

        for handle in handles {
            handle.abort();
        }
    }
}
