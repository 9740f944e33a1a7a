//! Built-in metric catalogue: display names, units and the realistic band
//! used when a reading has to be synthesized.

/// Band a synthetic random walk stays within.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticBand {
    pub min: f64,
    pub max: f64,
    /// Largest change between two consecutive samples.
    pub step: f64,
    pub start: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricDefinition {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: &'static str,
    pub band: SyntheticBand,
}

pub const AQI: &str = "AQI";
pub const TEMP: &str = "TEMP";
pub const HUMIDITY: &str = "HUMIDITY";
pub const FILTER: &str = "FILTER";
pub const PM25: &str = "PM25";
pub const VOC: &str = "VOC";

const METRICS: &[MetricDefinition] = &[
    MetricDefinition {
        key: AQI,
        name: "AQI",
        unit: "",
        band: SyntheticBand { min: 20.0, max: 120.0, step: 4.0, start: 45.0 },
    },
    MetricDefinition {
        key: TEMP,
        name: "Temperature",
        unit: "°C",
        band: SyntheticBand { min: 18.0, max: 32.0, step: 0.25, start: 24.0 },
    },
    MetricDefinition {
        key: HUMIDITY,
        name: "Humidity",
        unit: "%",
        band: SyntheticBand { min: 30.0, max: 65.0, step: 1.5, start: 45.0 },
    },
    MetricDefinition {
        key: FILTER,
        name: "Filter efficiency",
        unit: "%",
        band: SyntheticBand { min: 60.0, max: 100.0, step: 0.5, start: 92.0 },
    },
    MetricDefinition {
        key: PM25,
        name: "PM2.5",
        unit: "µg/m³",
        band: SyntheticBand { min: 20.0, max: 60.0, step: 2.5, start: 42.0 },
    },
    MetricDefinition {
        key: VOC,
        name: "VOC level",
        unit: "ppb",
        band: SyntheticBand { min: 100.0, max: 150.0, step: 5.0, start: 120.0 },
    },
];

/// Band for metrics the catalogue does not know about.
const FALLBACK_BAND: SyntheticBand = SyntheticBand { min: 0.0, max: 100.0, step: 2.0, start: 50.0 };

pub fn lookup(key: &str) -> Option<&'static MetricDefinition> {
    METRICS.iter().find(|m| m.key.eq_ignore_ascii_case(key))
}

/// Human-readable metric name; unknown keys are spoken as-is.
pub fn display_name(key: &str) -> &str {
    lookup(key).map(|m| m.name).unwrap_or(key)
}

pub fn unit_of(key: &str) -> &'static str {
    lookup(key).map(|m| m.unit).unwrap_or("")
}

pub fn band_of(key: &str) -> SyntheticBand {
    lookup(key).map(|m| m.band).unwrap_or(FALLBACK_BAND)
}
