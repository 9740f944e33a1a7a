//! Downloadable exports: the 24 h CSV history and the compliance report.
//!
//! The CSV history is synthesized; no sample in it comes from a sensor. The
//! HTTP layer flags the response accordingly.

use crate::alerts::format_value;
use crate::catalog;
use crate::compliance::{aggregate, classify, find_limit, FacilityEvaluation};
use crate::models::{Alert, ComplianceStatus, MetricReading, ReadingSource, RegulatoryLimit};
use crate::synthetic::{HistorySample, SyntheticSource};
use serde::Serialize;
use std::fmt::Write;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const CSV_HEADER: &str =
    "Timestamp,Site_ID,AQI,Temperature_C,Humidity_Pct,Filter_Efficiency,Compliance_Status";
pub const HISTORY_HOURS: usize = 24;

/// Column order of the metric values in a CSV row.
const CSV_METRICS: [&str; 4] = [catalog::AQI, catalog::TEMP, catalog::HUMIDITY, catalog::FILTER];

const UNAVAILABLE: &str = "—";

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Worst status across the sample's metrics that carry a limit.
fn sample_status(sample: &HistorySample, limits: &[RegulatoryLimit]) -> ComplianceStatus {
    aggregate(sample.values.iter().filter_map(|(key, value)| {
        find_limit(limits, key).map(|limit| classify(*value, limit))
    }))
}

pub fn render_csv(site_id: &str, samples: &[HistorySample], limits: &[RegulatoryLimit]) -> String {
    let mut out = String::with_capacity(64 * (samples.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');
    let site = csv_field(site_id);
    for sample in samples {
        let _ = write!(out, "{},{}", rfc3339(sample.at), site);
        for key in CSV_METRICS {
            match sample.values.get(key) {
                Some(v) if !v.is_nan() => {
                    let _ = write!(out, ",{v:.1}");
                }
                _ => out.push(','),
            }
        }
        let _ = writeln!(out, ",{}", sample_status(sample, limits));
    }
    out
}

/// Hourly history ending at `end`, oldest row first.
pub fn history_csv(
    site_id: &str,
    limits: &[RegulatoryLimit],
    synthetic: &mut SyntheticSource,
    end: OffsetDateTime,
) -> String {
    let samples = synthetic.hourly_history(&CSV_METRICS, HISTORY_HOURS, end);
    render_csv(site_id, &samples, limits)
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRow {
    pub metric_key: String,
    pub name: String,
    pub value: Option<f64>,
    pub unit: String,
    /// `None` for metrics without a regulatory limit.
    pub status: Option<ComplianceStatus>,
    pub source: ReadingSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub site_id: String,
    pub generated_at: String,
    pub facility_status: ComplianceStatus,
    pub dominant_metric: Option<String>,
    pub snapshot: Vec<SnapshotRow>,
    pub incidents: Vec<Alert>,
}

impl ComplianceReport {
    pub fn build(
        site_id: &str,
        readings: &[MetricReading],
        limits: &[RegulatoryLimit],
        alerts: Vec<Alert>,
    ) -> Self {
        let evaluation = FacilityEvaluation::from_readings(readings, limits);
        let snapshot = readings
            .iter()
            .map(|r| SnapshotRow {
                metric_key: r.metric_key.clone(),
                name: catalog::display_name(&r.metric_key).to_string(),
                value: r.is_available().then_some(r.value),
                unit: r.unit.clone(),
                status: find_limit(limits, &r.metric_key).map(|l| classify(r.value, l)),
                source: r.source,
            })
            .collect();

        Self {
            site_id: site_id.to_string(),
            generated_at: rfc3339(OffsetDateTime::now_utc()),
            facility_status: evaluation.facility_status,
            dominant_metric: evaluation.dominant_metric,
            snapshot,
            incidents: alerts,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "AtmoSmart Compliance Report");
        let _ = writeln!(out, "Site: {}", self.site_id);
        let _ = writeln!(out, "Generated: {}", self.generated_at);

        let _ = writeln!(out, "\nExecutive Status");
        let _ = writeln!(out, "  Facility status: {}", self.facility_status);
        if let Some(metric) = &self.dominant_metric {
            let _ = writeln!(out, "  Driven by: {}", catalog::display_name(metric));
        }

        let _ = writeln!(out, "\nTelemetry Snapshot");
        let _ = writeln!(out, "  {:<22} {:>12}  {:<14} {}", "Metric", "Value", "Status", "Source");
        for row in &self.snapshot {
            let value = row
                .value
                .map(|v| format_value(v, &row.unit))
                .unwrap_or_else(|| UNAVAILABLE.to_string());
            let status = row.status.map(|s| s.as_str()).unwrap_or("-");
            let source = match row.source {
                ReadingSource::Live => "live",
                ReadingSource::Synthetic => "SIMULATED",
            };
            let _ = writeln!(out, "  {:<22} {:>12}  {:<14} {}", row.name, value, status, source);
        }

        let _ = writeln!(out, "\nActive Incidents");
        if self.incidents.is_empty() {
            let _ = writeln!(out, "  None.");
        }
        for alert in &self.incidents {
            let _ = writeln!(
                out,
                "  [{:?}] {}: {}",
                alert.severity, alert.metric_key, alert.message
            );
        }
        out
    }
}
