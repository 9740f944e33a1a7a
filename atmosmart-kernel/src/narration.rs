//! Narration scripts handed verbatim to a speech backend.
//!
//! Plain text only. Unavailable readings are said to be unavailable, never
//! replaced by a number.

use crate::catalog;
use crate::compliance::{dominant, evaluate};
use crate::models::{ComplianceStatus, MetricReading, ReadingSource, RegulatoryLimit};

pub const REASSURANCE: &str = "Air quality is safe for occupants.";
const NO_DOMINANT_CAUSE: &str = "No single reading could be identified as the cause.";

/// Unit as it should be spoken; `None` for no unit phrase.
pub fn spoken_unit(unit: &str) -> Option<&str> {
    match unit.trim() {
        "" => None,
        "%" => Some("percent"),
        "°C" => Some("degrees Celsius"),
        other => Some(other),
    }
}

fn spoken_value(value: f64, unit: &str) -> String {
    match spoken_unit(unit) {
        Some(unit) => format!("{value:.1} {unit}"),
        None => format!("{value:.1}"),
    }
}

fn unavailable(metric_key: &str) -> String {
    format!("{} reading is currently unavailable.", catalog::display_name(metric_key))
}

/// "<metric name> is currently <value> <unit>."
pub fn describe_metric(reading: &MetricReading) -> String {
    if !reading.is_available() {
        return unavailable(&reading.metric_key);
    }
    format!(
        "{} is currently {}.",
        catalog::display_name(&reading.metric_key),
        spoken_value(reading.value, &reading.unit)
    )
}

#[derive(Debug, Clone)]
pub struct Narrator {
    limits: Vec<RegulatoryLimit>,
}

impl Narrator {
    pub fn new(limits: Vec<RegulatoryLimit>) -> Self {
        Self { limits }
    }

    /// Facility briefing: verdict, the metric driving it, every reading, and
    /// the reassurance clause when compliant.
    pub fn describe_facility(
        &self,
        readings: &[MetricReading],
        facility_status: ComplianceStatus,
    ) -> String {
        let mut sentences = vec![format!(
            "The facility is currently {}.",
            facility_status.spoken()
        )];

        if facility_status != ComplianceStatus::Compliant {
            let statuses = evaluate(readings, &self.limits);
            match dominant(&statuses) {
                Some(cause) => {
                    let unit = readings
                        .iter()
                        .find(|r| r.metric_key == cause.metric_key)
                        .map(|r| r.unit.as_str())
                        .unwrap_or("");
                    let verb = if cause.status == ComplianceStatus::NonCompliant {
                        "exceeds"
                    } else {
                        "is approaching"
                    };
                    sentences.push(format!(
                        "{} at {} {} the {} limit.",
                        catalog::display_name(&cause.metric_key),
                        spoken_value(cause.value.unwrap_or(f64::NAN), unit),
                        verb,
                        cause.label
                    ));
                }
                None => sentences.push(NO_DOMINANT_CAUSE.to_string()),
            }
        }

        sentences.extend(readings.iter().map(describe_metric));

        if readings.iter().any(|r| r.source == ReadingSource::Synthetic) {
            sentences.push(
                "Some readings are simulated because the sensor feed could not be reached."
                    .to_string(),
            );
        }

        if facility_status == ComplianceStatus::Compliant {
            sentences.push(REASSURANCE.to_string());
        }

        sentences.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Vec<RegulatoryLimit> {
        vec![
            RegulatoryLimit {
                metric_key: "AQI".into(),
                limit: 100.0,
                at_risk_fraction: 0.75,
                label: "EPA AQI".into(),
            },
            RegulatoryLimit {
                metric_key: "TEMP".into(),
                limit: 35.0,
                at_risk_fraction: 0.857,
                label: "heat stress".into(),
            },
        ]
    }

    fn reading(key: &str, value: f64, unit: &str) -> MetricReading {
        MetricReading::new(key, value, unit, ReadingSource::Live)
    }

    #[test]
    fn metric_sentences_translate_units() {
        assert_eq!(
            describe_metric(&reading("HUMIDITY", 45.3, "%")),
            "Humidity is currently 45.3 percent."
        );
        assert_eq!(
            describe_metric(&reading("TEMP", 24.0, "°C")),
            "Temperature is currently 24.0 degrees Celsius."
        );
        assert_eq!(describe_metric(&reading("AQI", 42.0, "")), "AQI is currently 42.0.");
        assert_eq!(describe_metric(&reading("CO2", 612.0, "ppm")), "CO2 is currently 612.0 ppm.");
    }

    #[test]
    fn missing_reading_is_not_fabricated() {
        let text = describe_metric(&reading("TEMP", f64::NAN, "°C"));
        assert_eq!(text, "Temperature reading is currently unavailable.");
        assert!(!text.chars().any(|c| c.is_ascii_digit()));
    }

    #[test]
    fn compliant_facility_ends_with_reassurance() {
        let narrator = Narrator::new(limits());
        let readings = [reading("AQI", 40.0, "")];
        let text = narrator.describe_facility(&readings, ComplianceStatus::Compliant);
        assert!(text.starts_with("The facility is currently compliant."));
        assert!(text.ends_with(REASSURANCE));
    }

    #[test]
    fn non_compliant_facility_cites_dominant_metric() {
        let narrator = Narrator::new(limits());
        let readings = [reading("AQI", 50.0, ""), reading("TEMP", 36.0, "°C")];
        let text = narrator.describe_facility(&readings, ComplianceStatus::NonCompliant);

        assert!(text.starts_with("The facility is currently non-compliant."));
        assert!(
            text.contains("Temperature at 36.0 degrees Celsius exceeds the heat stress limit.")
        );
        assert!(!text.contains(REASSURANCE));
    }

    #[test]
    fn at_risk_facility_mentions_proximity() {
        let narrator = Narrator::new(limits());
        let readings = [reading("AQI", 80.0, "")];
        let text = narrator.describe_facility(&readings, ComplianceStatus::AtRisk);
        assert!(text.contains("AQI at 80.0 is approaching the EPA AQI limit."));
    }

    #[test]
    fn gaps_and_simulated_data_are_stated() {
        let narrator = Narrator::new(limits());
        let mut simulated = reading("AQI", 30.0, "");
        simulated.source = ReadingSource::Synthetic;
        let readings = [simulated, reading("TEMP", f64::NAN, "°C")];
        let text = narrator.describe_facility(&readings, ComplianceStatus::Compliant);

        assert!(text.contains("Temperature reading is currently unavailable."));
        assert!(text.contains("simulated"));
    }
}
