//! Compliance evaluation: a reading against its regulatory limit, and a set of
//! per-metric statuses folded into the facility status.
//!
//! Every function here is pure. Status depends only on the current value and
//! the limit; there is no history, hysteresis or debouncing.

use crate::models::{ComplianceStatus, MetricReading, RegulatoryLimit};
use serde::Serialize;

/// Classify a single value.
///
/// A NaN value (absent sensor, unparsable payload) classifies as `Compliant`
/// so that a transient read failure never raises an alarm. Callers that need
/// to know about the gap check [`MetricReading::is_available`].
pub fn classify(value: f64, limit: &RegulatoryLimit) -> ComplianceStatus {
    if value.is_nan() {
        return ComplianceStatus::Compliant;
    }
    if value > limit.limit {
        ComplianceStatus::NonCompliant
    } else if value > limit.at_risk_threshold() {
        ComplianceStatus::AtRisk
    } else {
        ComplianceStatus::Compliant
    }
}

/// Worst status wins; an empty set is `Compliant`.
pub fn aggregate<I>(statuses: I) -> ComplianceStatus
where
    I: IntoIterator<Item = ComplianceStatus>,
{
    statuses.into_iter().max().unwrap_or(ComplianceStatus::Compliant)
}

/// Status of one metric that has a configured limit.
#[derive(Debug, Clone, Serialize)]
pub struct MetricStatus {
    pub metric_key: String,
    /// `None` when the reading is unavailable.
    pub value: Option<f64>,
    pub limit: f64,
    pub label: String,
    pub status: ComplianceStatus,
    /// value / limit, `None` when unavailable.
    pub ratio: Option<f64>,
}

pub fn find_limit<'a>(
    limits: &'a [RegulatoryLimit],
    metric_key: &str,
) -> Option<&'a RegulatoryLimit> {
    limits.iter().find(|l| l.metric_key == metric_key)
}

/// Classify every reading that has a limit. Readings without one are not
/// part of the compliance taxonomy and are skipped.
pub fn evaluate(readings: &[MetricReading], limits: &[RegulatoryLimit]) -> Vec<MetricStatus> {
    readings
        .iter()
        .filter_map(|reading| {
            let limit = find_limit(limits, &reading.metric_key)?;
            let value = reading.is_available().then_some(reading.value);
            Some(MetricStatus {
                metric_key: reading.metric_key.clone(),
                value,
                limit: limit.limit,
                label: limit.label.clone(),
                status: classify(reading.value, limit),
                ratio: value.map(|v| v / limit.limit),
            })
        })
        .collect()
}

/// The metric driving a non-compliant or at-risk verdict: worst status, then
/// highest ratio to its limit, then metric key ascending.
pub fn dominant(statuses: &[MetricStatus]) -> Option<&MetricStatus> {
    statuses
        .iter()
        .filter(|s| s.status != ComplianceStatus::Compliant)
        .min_by(|a, b| {
            b.status
                .cmp(&a.status)
                .then_with(|| {
                    let ra = a.ratio.unwrap_or(0.0);
                    let rb = b.ratio.unwrap_or(0.0);
                    rb.total_cmp(&ra)
                })
                .then_with(|| a.metric_key.cmp(&b.metric_key))
        })
}

/// Facility evaluation as served to the dashboard and the event bus.
#[derive(Debug, Clone, Serialize)]
pub struct FacilityEvaluation {
    pub facility_status: ComplianceStatus,
    pub metrics: Vec<MetricStatus>,
    pub dominant_metric: Option<String>,
}

impl FacilityEvaluation {
    pub fn from_readings(readings: &[MetricReading], limits: &[RegulatoryLimit]) -> Self {
        let metrics = evaluate(readings, limits);
        let facility_status = aggregate(metrics.iter().map(|m| m.status));
        let dominant_metric = dominant(&metrics).map(|m| m.metric_key.clone());
        Self { facility_status, metrics, dominant_metric }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ComplianceStatus::*;
    use crate::models::ReadingSource;

    fn aqi_limit() -> RegulatoryLimit {
        RegulatoryLimit {
            metric_key: "AQI".into(),
            limit: 100.0,
            at_risk_fraction: 0.75,
            label: "EPA AQI 100".into(),
        }
    }

    fn temp_limit() -> RegulatoryLimit {
        RegulatoryLimit {
            metric_key: "TEMP".into(),
            limit: 35.0,
            at_risk_fraction: 0.857,
            label: "heat stress 35 °C".into(),
        }
    }

    fn reading(key: &str, value: f64) -> MetricReading {
        MetricReading::new(key, value, "", ReadingSource::Live)
    }

    #[test]
    fn classify_bands() {
        let limit = aqi_limit();
        assert_eq!(classify(50.0, &limit), Compliant);
        assert_eq!(classify(75.0, &limit), Compliant);
        assert_eq!(classify(75.01, &limit), AtRisk);
        assert_eq!(classify(80.0, &limit), AtRisk);
        assert_eq!(classify(100.0, &limit), AtRisk);
        assert_eq!(classify(110.0, &limit), NonCompliant);
    }

    #[test]
    fn classify_sweep_matches_thresholds() {
        let limit = aqi_limit();
        for i in 0..=2000 {
            let v = i as f64 * 0.1;
            let expected = if v > 100.0 {
                NonCompliant
            } else if v > 75.0 {
                AtRisk
            } else {
                Compliant
            };
            assert_eq!(classify(v, &limit), expected, "value {v}");
        }
    }

    #[test]
    fn nan_is_fail_safe_compliant() {
        assert_eq!(classify(f64::NAN, &aqi_limit()), Compliant);
    }

    #[test]
    fn fraction_of_one_has_no_at_risk_band() {
        let mut limit = aqi_limit();
        limit.at_risk_fraction = 1.0;
        assert_eq!(classify(100.0, &limit), Compliant);
        assert_eq!(classify(100.5, &limit), NonCompliant);
    }

    #[test]
    fn aggregate_worst_wins() {
        assert_eq!(aggregate(Vec::<ComplianceStatus>::new()), Compliant);
        assert_eq!(aggregate([Compliant, AtRisk]), AtRisk);
        assert_eq!(aggregate([AtRisk, NonCompliant, Compliant]), NonCompliant);
        // order and duplication do not matter
        assert_eq!(aggregate([NonCompliant, AtRisk]), aggregate([AtRisk, NonCompliant]));
        assert_eq!(aggregate([AtRisk, AtRisk, AtRisk]), aggregate([AtRisk]));
    }

    #[test]
    fn hot_room_with_clean_air_is_non_compliant() {
        let limits = vec![aqi_limit(), temp_limit()];
        let readings = vec![reading("AQI", 50.0), reading("TEMP", 36.0)];
        let eval = FacilityEvaluation::from_readings(&readings, &limits);

        assert_eq!(eval.facility_status, NonCompliant);
        assert_eq!(eval.dominant_metric.as_deref(), Some("TEMP"));
        let aqi = eval.metrics.iter().find(|m| m.metric_key == "AQI").unwrap();
        assert_eq!(aqi.status, Compliant);
    }

    #[test]
    fn evaluate_skips_metrics_without_limit_and_reports_gaps() {
        let limits = vec![aqi_limit()];
        let readings = vec![reading("AQI", f64::NAN), reading("FILTER", 15.0)];
        let statuses = evaluate(&readings, &limits);

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].value, None);
        assert_eq!(statuses[0].ratio, None);
        assert_eq!(statuses[0].status, Compliant);
    }

    #[test]
    fn dominant_prefers_higher_ratio_then_key() {
        let limits = vec![aqi_limit(), temp_limit()];
        // both at risk; TEMP 34/35 = 0.97 beats AQI 80/100 = 0.8
        let statuses = evaluate(&[reading("AQI", 80.0), reading("TEMP", 34.0)], &limits);
        assert_eq!(dominant(&statuses).unwrap().metric_key, "TEMP");

        let all_clear = evaluate(&[reading("AQI", 10.0)], &limits);
        assert!(dominant(&all_clear).is_none());
    }
}
