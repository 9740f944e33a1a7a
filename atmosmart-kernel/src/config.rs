use crate::alerts::MaintenanceRule;
use crate::catalog;
use crate::charts::{default_widgets, Widget};
use crate::models::RegulatoryLimit;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

pub const DEFAULT_CHANNEL_ID: &str = "3234017";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid limit for {metric}: {reason}")]
    InvalidLimit { metric: String, reason: String },
    #[error("invalid channel {channel}: {reason}")]
    InvalidChannel { channel: String, reason: String },
    #[error("poll interval must be at least one second")]
    InvalidPollInterval,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub site_id: String,
    pub http: HttpConf,
    pub poll_interval_secs: u64,
    /// Seed for synthetic telemetry; random when absent.
    pub seed: Option<u64>,
    pub charts_base_url: String,
    pub channels: Vec<ChannelConf>,
    pub limits: Vec<RegulatoryLimit>,
    pub maintenance: MaintenanceRule,
    pub narration: NarrationConf,
    pub mqtt: Option<MqttConf>,
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelConf {
    pub name: String,
    pub channel_id: String,
    #[serde(default = "default_telemetry_base")]
    pub base_url: String,
    #[serde(default)]
    pub read_api_key: Option<String>,
    /// Field number -> metric key, e.g. `2: AQI`.
    pub fields: BTreeMap<u8, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NarrationConf {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

fn default_telemetry_base() -> String {
    "https://api.thingspeak.com".into()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for NarrationConf {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".into(),
            model: "gemini-2.5-flash-preview-tts".into(),
            voice: "Kore".into(),
            api_key_env: "GEMINI_API_KEY".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        let fields = BTreeMap::from([
            (2, catalog::AQI.to_string()),
            (4, catalog::FILTER.to_string()),
            (7, catalog::TEMP.to_string()),
            (8, catalog::HUMIDITY.to_string()),
        ]);
        Self {
            site_id: "ATMO-001".into(),
            http: HttpConf::default(),
            poll_interval_secs: 15,
            seed: None,
            charts_base_url: "https://thingspeak.com".into(),
            channels: vec![ChannelConf {
                name: "air".into(),
                channel_id: DEFAULT_CHANNEL_ID.into(),
                base_url: default_telemetry_base(),
                read_api_key: None,
                fields,
                timeout_secs: default_timeout_secs(),
            }],
            limits: vec![
                RegulatoryLimit {
                    metric_key: catalog::AQI.into(),
                    limit: 100.0,
                    at_risk_fraction: 0.75,
                    label: "EPA AQI 100 (unhealthy for sensitive groups)".into(),
                },
                RegulatoryLimit {
                    metric_key: catalog::TEMP.into(),
                    limit: 35.0,
                    at_risk_fraction: 0.857,
                    label: "workplace heat stress 35 °C".into(),
                },
                RegulatoryLimit {
                    metric_key: catalog::HUMIDITY.into(),
                    limit: 60.0,
                    at_risk_fraction: 0.9,
                    label: "ASHRAE 55 relative humidity".into(),
                },
            ],
            maintenance: MaintenanceRule::default(),
            narration: NarrationConf::default(),
            mqtt: None,
            widgets: default_widgets(DEFAULT_CHANNEL_ID),
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        for limit in &self.limits {
            let invalid = |reason: &str| ConfigError::InvalidLimit {
                metric: limit.metric_key.clone(),
                reason: reason.to_string(),
            };
            if !limit.limit.is_finite() {
                return Err(invalid("limit must be a finite number"));
            }
            if !(limit.at_risk_fraction > 0.0 && limit.at_risk_fraction <= 1.0) {
                return Err(invalid("at_risk_fraction must be in (0, 1]"));
            }
        }
        let mut names = HashSet::new();
        for channel in &self.channels {
            let invalid = |reason: &str| ConfigError::InvalidChannel {
                channel: channel.name.clone(),
                reason: reason.to_string(),
            };
            if !names.insert(channel.name.as_str()) {
                return Err(invalid("duplicate channel name"));
            }
            if channel.fields.is_empty() {
                return Err(invalid("no fields mapped"));
            }
            if channel.fields.keys().any(|f| !(1..=8).contains(f)) {
                return Err(invalid("field numbers must be between 1 and 8"));
            }
        }
        Ok(())
    }

    /// Parse and validate a YAML document; blank input yields the defaults.
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: KernelConfig = serde_yaml::from_str(txt)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

pub async fn load_config_from(path: &Path) -> Result<KernelConfig, ConfigError> {
    if !path.exists() {
        warn!("no config file at {}, using built-in defaults", path.display());
        return Ok(KernelConfig::default());
    }
    let txt = fs::read_to_string(path).await?;
    let cfg = KernelConfig::from_yaml(&txt)?;
    info!(
        "loaded config from {} ({} channels, {} limits)",
        path.display(),
        cfg.channels.len(),
        cfg.limits.len()
    );
    Ok(cfg)
}

/// Path from `ATMOSMART_CONFIG`, falling back to `atmosmart.yaml`.
pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var("ATMOSMART_CONFIG").unwrap_or_else(|_| "atmosmart.yaml".into());
    load_config_from(Path::new(&path)).await
}
