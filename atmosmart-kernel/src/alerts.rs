//! Alert generation from the current readings.
//!
//! Alerts are recomputed from scratch on every evaluation; the list reflects
//! only the present state and replaces whatever the consumer held before.

use crate::catalog;
use crate::compliance::{classify, find_limit};
use crate::models::{Alert, ComplianceStatus, MetricReading, RegulatoryLimit, Severity};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

/// Secondary rule for a consumable (filter) metric, independent from the
/// compliance taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceRule {
    pub metric_key: String,
    /// Alert when the value falls strictly below this.
    pub threshold: f64,
    /// Metric tag carried by the maintenance alert.
    pub tag: String,
}

impl Default for MaintenanceRule {
    fn default() -> Self {
        Self {
            metric_key: catalog::FILTER.to_string(),
            threshold: 20.0,
            tag: "MAINT".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertGenerator {
    limits: Vec<RegulatoryLimit>,
    maintenance: MaintenanceRule,
}

impl AlertGenerator {
    pub fn new(limits: Vec<RegulatoryLimit>, maintenance: MaintenanceRule) -> Self {
        Self { limits, maintenance }
    }

    pub fn generate(&self, readings: &[MetricReading]) -> Vec<Alert> {
        generate_alerts(readings, &self.limits, &self.maintenance)
    }
}

/// Build the alert list for the given readings, ordered by severity and then
/// metric key.
pub fn generate_alerts(
    readings: &[MetricReading],
    limits: &[RegulatoryLimit],
    maintenance: &MaintenanceRule,
) -> Vec<Alert> {
    let now = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    let mut alerts = Vec::new();

    for reading in readings {
        if let Some(limit) = find_limit(limits, &reading.metric_key) {
            match classify(reading.value, limit) {
                ComplianceStatus::NonCompliant => {
                    let message = breach_message(reading, limit);
                    alerts.push(alert(Severity::Critical, message, &reading.metric_key, &now));
                }
                ComplianceStatus::AtRisk => {
                    let message = proximity_message(reading, limit);
                    alerts.push(alert(Severity::Warning, message, &reading.metric_key, &now));
                }
                ComplianceStatus::Compliant => {}
            }
        }

        // NaN compares false, so an unavailable filter reading never triggers
        if reading.metric_key == maintenance.metric_key && reading.value < maintenance.threshold {
            let message = maintenance_message(reading, maintenance);
            alerts.push(alert(Severity::Warning, message, &maintenance.tag, &now));
        }
    }

    alerts.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.metric_key.cmp(&b.metric_key))
    });
    alerts
}

fn alert(severity: Severity, message: String, metric_key: &str, timestamp: &str) -> Alert {
    Alert {
        id: Uuid::new_v4().to_string(),
        severity,
        message,
        metric_key: metric_key.to_string(),
        timestamp: timestamp.to_string(),
    }
}

/// `42.0`, `42.0%` or `42.0 °C` depending on the unit.
pub(crate) fn format_value(value: f64, unit: &str) -> String {
    match unit.trim() {
        "" => format!("{value:.1}"),
        "%" => format!("{value:.1}%"),
        unit => format!("{value:.1} {unit}"),
    }
}

fn breach_message(reading: &MetricReading, limit: &RegulatoryLimit) -> String {
    format!(
        "{} at {} exceeds the {} limit of {}",
        catalog::display_name(&reading.metric_key),
        format_value(reading.value, &reading.unit),
        limit.label,
        format_value(limit.limit, &reading.unit),
    )
}

fn proximity_message(reading: &MetricReading, limit: &RegulatoryLimit) -> String {
    format!(
        "{} at {} is approaching the {} limit ({:.0}% of {})",
        catalog::display_name(&reading.metric_key),
        format_value(reading.value, &reading.unit),
        limit.label,
        reading.value / limit.limit * 100.0,
        format_value(limit.limit, &reading.unit),
    )
}

fn maintenance_message(reading: &MetricReading, rule: &MaintenanceRule) -> String {
    format!(
        "{} at {} is below the service threshold of {}; schedule a replacement",
        catalog::display_name(&reading.metric_key),
        format_value(reading.value, &reading.unit),
        format_value(rule.threshold, &reading.unit),
    )
}
