//! Locally synthesized telemetry.
//!
//! Used when a channel cannot be read, and to back the 24 h export. Every
//! reading produced here is tagged [`ReadingSource::Synthetic`].

use crate::catalog::{self, SyntheticBand};
use crate::models::{MetricReading, ReadingSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};

/// Seeded random walk, one independent walk per metric key.
pub struct SyntheticSource {
    rng: StdRng,
    last: HashMap<String, f64>,
}

impl SyntheticSource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, last: HashMap::new() }
    }

    /// Next value of the walk for `metric_key`, clamped to its band.
    pub fn next_value(&mut self, metric_key: &str) -> f64 {
        let band = catalog::band_of(metric_key);
        let current = self.last.get(metric_key).copied().unwrap_or(band.start);
        let next = self.step_from(current, band);
        self.last.insert(metric_key.to_string(), next);
        next
    }

    /// One step of the walk from an externally held value. Values outside
    /// the band are pulled back onto its edge.
    pub fn step_from(&mut self, current: f64, band: SyntheticBand) -> f64 {
        let step = self.rng.gen_range(-1.0_f64..=1.0) * band.step;
        (current + step).clamp(band.min, band.max)
    }

    /// Uniform noise in `[center - spread, center + spread]`.
    pub fn jitter(&mut self, center: f64, spread: f64) -> f64 {
        center + self.rng.gen_range(-spread..=spread)
    }

    pub fn readings<S: AsRef<str>>(&mut self, metric_keys: &[S]) -> Vec<MetricReading> {
        metric_keys
            .iter()
            .map(|key| {
                let key = key.as_ref();
                let value = self.next_value(key);
                MetricReading::new(key, value, catalog::unit_of(key), ReadingSource::Synthetic)
            })
            .collect()
    }

    /// `hours` hourly samples ending at `end`, oldest first.
    pub fn hourly_history<S: AsRef<str>>(
        &mut self,
        metric_keys: &[S],
        hours: usize,
        end: OffsetDateTime,
    ) -> Vec<HistorySample> {
        (0..hours)
            .rev()
            .map(|offset| {
                let at = end - Duration::hours(offset as i64);
                let values = metric_keys
                    .iter()
                    .map(|key| (key.as_ref().to_string(), self.next_value(key.as_ref())))
                    .collect();
                HistorySample { at, values }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct HistorySample {
    pub at: OffsetDateTime,
    pub values: HashMap<String, f64>,
}
