//! Dashboard widget descriptors for the embedded provider charts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Gauge,
    Status,
    Column,
    Step,
}

impl ChartKind {
    /// Value of the provider's `type` chart parameter. The provider has no
    /// gauge or status chart, so those render as lines.
    pub fn chart_type(self) -> &'static str {
        match self {
            ChartKind::Line | ChartKind::Gauge | ChartKind::Status => "line",
            ChartKind::Column => "column",
            ChartKind::Step => "step",
        }
    }

    /// URL-encoded accent colour.
    pub fn accent(self) -> &'static str {
        match self {
            ChartKind::Column => "%230ea5e9",
            ChartKind::Step => "%23f59e0b",
            _ => "%2310b981",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub title: String,
    pub channel_id: String,
    pub field_id: u8,
    pub kind: ChartKind,
    #[serde(default)]
    pub description: Option<String>,
}

impl Widget {
    fn new(channel_id: &str, field_id: u8, title: &str, kind: ChartKind, note: &str) -> Self {
        Self {
            title: title.to_string(),
            channel_id: channel_id.to_string(),
            field_id,
            kind,
            description: Some(note.to_string()),
        }
    }

    pub fn iframe_src(&self, charts_base_url: &str) -> String {
        format!(
            "{}/channels/{}/charts/{}?bgcolor=%23ffffff&color={}&dynamic=true&results=60&title=&type={}",
            charts_base_url.trim_end_matches('/'),
            self.channel_id,
            self.field_id,
            self.kind.accent(),
            self.kind.chart_type()
        )
    }
}

/// Widget plus its resolved iframe URL, as served to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetView {
    #[serde(flatten)]
    pub widget: Widget,
    pub iframe_src: String,
}

pub fn widget_views(widgets: &[Widget], charts_base_url: &str) -> Vec<WidgetView> {
    widgets
        .iter()
        .map(|w| WidgetView {
            iframe_src: w.iframe_src(charts_base_url),
            widget: w.clone(),
        })
        .collect()
}

const DEFAULT_WIDGETS: [(u8, &str, ChartKind, &str); 6] = [
    (
        1,
        "MQ135 Gas Sensor Readings",
        ChartKind::Line,
        "Raw voltage output indicating general air quality.",
    ),
    (
        2,
        "Air Quality Index (AQI)",
        ChartKind::Gauge,
        "AQI derived from the sensor ppm conversion.",
    ),
    (
        3,
        "Ventilation Fan Status",
        ChartKind::Step,
        "0 = off, 1 = on (active purification).",
    ),
    (
        4,
        "Carbon Filter Status",
        ChartKind::Line,
        "Usage tracking of the active carbon filter element.",
    ),
    (
        5,
        "Pollution Trend",
        ChartKind::Column,
        "-1 improving, 0 stable, 1 worsening.",
    ),
    (
        6,
        "Environmental Risk Level",
        ChartKind::Line,
        "0 safe, 1 warning, 2 critical.",
    ),
];

pub fn default_widgets(channel_id: &str) -> Vec<Widget> {
    DEFAULT_WIDGETS
        .iter()
        .map(|&(field_id, title, kind, note)| Widget::new(channel_id, field_id, title, kind, note))
        .collect()
}
