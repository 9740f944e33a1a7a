use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

/// Origin of a reading. Synthetic readings are produced locally when a
/// channel cannot be read and must never be presented as sensor data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingSource {
    Live,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReading {
    pub metric_key: String,
    /// NaN when the provider returned nothing usable; serialized as `null`.
    #[serde(with = "nan_as_null")]
    pub value: f64,
    pub unit: String,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub source: ReadingSource,
}

impl MetricReading {
    pub fn new(metric_key: &str, value: f64, unit: &str, source: ReadingSource) -> Self {
        Self {
            metric_key: metric_key.to_string(),
            value,
            unit: unit.to_string(),
            captured_at: OffsetDateTime::now_utc(),
            source,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.value.is_nan()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryLimit {
    pub metric_key: String,
    pub limit: f64,
    pub at_risk_fraction: f64,
    pub label: String,
}

impl RegulatoryLimit {
    /// Value above which a reading is considered at risk.
    pub fn at_risk_threshold(&self) -> f64 {
        self.limit * self.at_risk_fraction
    }
}

/// Ordered so that `max()` yields the worst status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComplianceStatus {
    Compliant,
    AtRisk,
    NonCompliant,
}

impl ComplianceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplianceStatus::Compliant => "Compliant",
            ComplianceStatus::AtRisk => "At Risk",
            ComplianceStatus::NonCompliant => "Non-Compliant",
        }
    }

    /// Lower-case wording used in narration.
    pub fn spoken(self) -> &'static str {
        match self {
            ComplianceStatus::Compliant => "compliant",
            ComplianceStatus::AtRisk => "at risk",
            ComplianceStatus::NonCompliant => "non-compliant",
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity. Declaration order is output order: Critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub metric_key: String,
    pub timestamp: String,
}

/// Latest readings of one channel, replaced as a whole on every poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: String,
    pub readings: Vec<MetricReading>,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    pub source: ReadingSource,
}

/// Channel name -> latest snapshot. Last value wins per channel.
pub type LatestReadings = HashMap<String, ChannelSnapshot>;

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_is_worst_last() {
        assert!(ComplianceStatus::NonCompliant > ComplianceStatus::AtRisk);
        assert!(ComplianceStatus::AtRisk > ComplianceStatus::Compliant);
        assert!(Severity::Critical < Severity::Warning);
        assert!(Severity::Warning < Severity::Info);
    }

    #[test]
    fn nan_reading_serializes_as_null() {
        let reading = MetricReading::new("AQI", f64::NAN, "", ReadingSource::Live);
        let json = serde_json::to_value(&reading).unwrap();
        assert!(json["value"].is_null());
        assert_eq!(json["source"], "live");

        let back: MetricReading = serde_json::from_value(json).unwrap();
        assert!(!back.is_available());
    }
}
