//! Digital twin of the facility air handling.
//!
//! Mirrors the physical inputs once per second and derives the HVAC model
//! state from them. A dust spike scenario drives PM2.5 toward a peak so the
//! mitigation path can be exercised without touching the plant. Inputs are
//! synthesized; the twin never reads or writes the telemetry store.

use crate::catalog::{self, band_of};
use crate::state::Shared;
use crate::synthetic::SyntheticSource;
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub const TWIN_PERIOD: Duration = Duration::from_secs(1);

/// PM2.5 level the dust spike converges to, in µg/m³.
pub const SPIKE_PEAK_PM25: f64 = 180.0;
/// Fraction of the remaining gap to the peak closed on every tick.
const SPIKE_APPROACH: f64 = 0.2;
/// The scenario ends once its counter has passed this value.
const SPIKE_LAST_TICK: u32 = 20;

const NOMINAL_LOAD: f64 = 35.0;
const NOMINAL_RISK: f64 = 0.15;
const NOMINAL_RISK_JITTER: f64 = 0.05;
const NOMINAL_TEMP: f64 = 24.0;
const NOMINAL_OCCUPANCY: f64 = 85.0;

/// Risk above which the model boosts filtration.
pub const MITIGATION_RISK: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HvacMode {
    Eco,
    High,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TwinInputs {
    pub pm25: f64,
    pub voc: f64,
    pub temp: f64,
    pub occupancy: u32,
}

impl Default for TwinInputs {
    fn default() -> Self {
        Self {
            pm25: band_of(catalog::PM25).start,
            voc: band_of(catalog::VOC).start,
            temp: NOMINAL_TEMP,
            occupancy: NOMINAL_OCCUPANCY as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelState {
    pub risk_score: f64,
    pub hvac_mode: HvacMode,
    /// Percent of filtration capacity, 0 to 100.
    pub filtration_load: f64,
}

impl Default for ModelState {
    fn default() -> Self {
        Self {
            risk_score: NOMINAL_RISK,
            hvac_mode: HvacMode::Eco,
            filtration_load: NOMINAL_LOAD,
        }
    }
}

impl ModelState {
    /// Model reaction while a particulate event is in progress.
    pub fn reacting_to(pm25: f64) -> Self {
        let load = filtration_load(pm25);
        Self {
            risk_score: spike_risk(pm25),
            hvac_mode: hvac_mode(load),
            filtration_load: load,
        }
    }

    pub fn mitigation_triggered(&self) -> bool {
        self.risk_score > MITIGATION_RISK
    }
}

pub fn filtration_load(pm25: f64) -> f64 {
    (NOMINAL_LOAD + (pm25 - 50.0) * 1.5).clamp(0.0, 100.0)
}

pub fn spike_risk(pm25: f64) -> f64 {
    if pm25 > 100.0 {
        0.85
    } else {
        0.4
    }
}

pub fn hvac_mode(filtration_load: f64) -> HvacMode {
    if filtration_load > 80.0 {
        HvacMode::Max
    } else {
        HvacMode::High
    }
}

/// Extra energy drawn by the current filtration load, in kWh.
pub fn energy_delta_kwh(filtration_load: f64) -> f64 {
    if filtration_load > 50.0 {
        2.4
    } else {
        0.8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    DustSpike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub kind: ScenarioKind,
    pub tick: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwinView {
    #[serde(with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
    pub inputs: TwinInputs,
    pub model: ModelState,
    pub scenario: Option<Scenario>,
    pub mitigation_triggered: bool,
    pub energy_delta_kwh: f64,
}

pub struct DigitalTwin {
    source: SyntheticSource,
    inputs: TwinInputs,
    model: ModelState,
    scenario: Option<Scenario>,
    synced_at: Option<OffsetDateTime>,
}

impl DigitalTwin {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            source: SyntheticSource::new(seed),
            inputs: TwinInputs::default(),
            model: ModelState::default(),
            scenario: None,
            synced_at: None,
        }
    }

    /// Start the dust spike, or restart it from tick 0 if one is running.
    pub fn start_spike(&mut self) {
        if self.scenario.is_some() {
            info!("dust spike restarted");
        } else {
            info!(pm25 = self.inputs.pm25, "dust spike started");
        }
        self.scenario = Some(Scenario {
            kind: ScenarioKind::DustSpike,
            tick: 0,
        });
    }

    pub fn tick(&mut self, now: OffsetDateTime) {
        self.synced_at = Some(now);
        match self.scenario {
            Some(scenario) => self.spike_tick(scenario),
            None => self.nominal_tick(),
        }
    }

    fn nominal_tick(&mut self) {
        self.inputs = TwinInputs {
            pm25: self.source.step_from(self.inputs.pm25, band_of(catalog::PM25)),
            voc: self.source.step_from(self.inputs.voc, band_of(catalog::VOC)),
            temp: self.source.jitter(NOMINAL_TEMP, 0.25),
            occupancy: (NOMINAL_OCCUPANCY + self.source.jitter(0.0, 1.0).floor()) as u32,
        };
        let half = NOMINAL_RISK_JITTER / 2.0;
        self.model = ModelState {
            risk_score: NOMINAL_RISK + self.source.jitter(half, half),
            ..ModelState::default()
        };
    }

    fn spike_tick(&mut self, scenario: Scenario) {
        let pm25 = self.inputs.pm25 + (SPIKE_PEAK_PM25 - self.inputs.pm25) * SPIKE_APPROACH;
        self.inputs.pm25 = pm25;
        self.model = ModelState::reacting_to(pm25);

        if scenario.tick > SPIKE_LAST_TICK {
            self.scenario = None;
            info!(pm25, "dust spike finished");
        } else {
            self.scenario = Some(Scenario {
                tick: scenario.tick + 1,
                ..scenario
            });
        }
    }

    pub fn view(&self) -> TwinView {
        TwinView {
            synced_at: self.synced_at,
            inputs: self.inputs,
            model: self.model,
            scenario: self.scenario,
            mitigation_triggered: self.model.mitigation_triggered(),
            energy_delta_kwh: energy_delta_kwh(self.model.filtration_load),
        }
    }
}

pub fn spawn_twin(twin: Shared<DigitalTwin>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let mut guard = twin.lock();
            guard.tick(OffsetDateTime::now_utc());
            debug!(pm25 = guard.inputs.pm25, mode = ?guard.model.hvac_mode, "twin synced");
        }
    })
}
