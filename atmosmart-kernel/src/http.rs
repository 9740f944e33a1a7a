/**
 * API REST ATMOSMART - Serveur HTTP du kernel
 *
 * RÔLE : expose l'état de conformité au tableau de bord et aux outils
 * d'export. Toutes les réponses sont calculées à partir du dernier
 * snapshot de chaque canal.
 *
 * ROUTES : /health, /system/health, /readings, /status, /alerts,
 * /narration, /narration/text, /export/csv, /report, /report.txt, /widgets,
 * /twin, /simulate/spike
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Sans clé configurée (ATMOSMART_API_KEY), l'accès est refusé
 */

use crate::alerts::AlertGenerator;
use crate::charts::{widget_views, WidgetView};
use crate::compliance::FacilityEvaluation;
use crate::config::KernelConfig;
use crate::export::{history_csv, ComplianceReport};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{Alert, ChannelSnapshot, ComplianceStatus};
use crate::narration::Narrator;
use crate::speech::{NarrationOutput, NarrationService};
use crate::state::{ReadingStore, Shared};
use crate::synthetic::SyntheticSource;
use crate::twin::{DigitalTwin, TwinView};
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub const DATA_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-atmosmart-data-source");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<KernelConfig>,
    /// Value expected in `x-api-key`; `None` denies every protected route.
    pub api_key: Option<String>,
    pub store: ReadingStore,
    pub alerts: AlertGenerator,
    pub narrator: Narrator,
    pub narration: NarrationService,
    pub health_tracker: HealthTracker,
    /// Backs the CSV history export.
    pub history: Shared<SyntheticSource>,
    pub twin: Shared<DigitalTwin>,
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref() else {
        warn!("ATMOSMART_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request with missing or wrong API key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/readings", get(get_readings))
        .route("/status", get(get_status))
        .route("/alerts", get(get_alerts))
        .route("/narration", post(post_narration))
        .route("/narration/text", get(get_narration_text))
        .route("/export/csv", get(export_csv))
        .route("/report", get(get_report))
        .route("/report.txt", get(get_report_text))
        .route("/widgets", get(get_widgets))
        .route("/twin", get(get_twin))
        .route("/simulate/spike", post(post_spike))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.store))
}

// GET /readings
async fn get_readings(State(app): State<AppState>) -> Json<Vec<ChannelSnapshot>> {
    Json(app.store.snapshots())
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<FacilityEvaluation> {
    let readings = app.store.current_readings();
    Json(FacilityEvaluation::from_readings(&readings, &app.config.limits))
}

// GET /alerts
async fn get_alerts(State(app): State<AppState>) -> Json<Vec<Alert>> {
    Json(app.alerts.generate(&app.store.current_readings()))
}

#[derive(Debug, Serialize)]
struct NarrationScript {
    facility_status: ComplianceStatus,
    text: String,
}

fn narration_script(app: &AppState) -> NarrationScript {
    let readings = app.store.current_readings();
    let facility_status =
        FacilityEvaluation::from_readings(&readings, &app.config.limits).facility_status;
    NarrationScript {
        facility_status,
        text: app.narrator.describe_facility(&readings, facility_status),
    }
}

// GET /narration/text
async fn get_narration_text(State(app): State<AppState>) -> Json<NarrationScript> {
    Json(narration_script(&app))
}

// POST /narration : audio/wav, ou payload JSON de repli local (409 si déjà en cours)
async fn post_narration(State(app): State<AppState>) -> Response {
    let script = narration_script(&app);
    match app.narration.speak(&script.text).await {
        Ok(NarrationOutput::Audio(pcm)) => {
            ([(header::CONTENT_TYPE, "audio/wav")], pcm.to_wav()).into_response()
        }
        Ok(NarrationOutput::LocalFallback(payload)) => Json(payload).into_response(),
        Err(busy) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "ok": false, "msg": busy.to_string() })),
        )
            .into_response(),
    }
}

// GET /export/csv
async fn export_csv(State(app): State<AppState>) -> impl IntoResponse {
    let csv = {
        let mut history = app.history.lock();
        let now = OffsetDateTime::now_utc();
        history_csv(&app.config.site_id, &app.config.limits, &mut history, now)
    };
    let disposition = format!("attachment; filename=\"atmosmart-{}-24h.csv\"", app.config.site_id);
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (DATA_SOURCE_HEADER, "synthetic".to_string()),
        ],
        csv,
    )
}

fn build_report(app: &AppState) -> ComplianceReport {
    let readings = app.store.current_readings();
    let alerts = app.alerts.generate(&readings);
    ComplianceReport::build(&app.config.site_id, &readings, &app.config.limits, alerts)
}

// GET /report
async fn get_report(State(app): State<AppState>) -> Json<ComplianceReport> {
    Json(build_report(&app))
}

// GET /report.txt
async fn get_report_text(State(app): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        build_report(&app).render_text(),
    )
}

// GET /widgets
async fn get_widgets(State(app): State<AppState>) -> Json<Vec<WidgetView>> {
    Json(widget_views(&app.config.widgets, &app.config.charts_base_url))
}

// GET /twin
async fn get_twin(State(app): State<AppState>) -> impl IntoResponse {
    ([(DATA_SOURCE_HEADER, "synthetic")], Json(app.twin.lock().view()))
}

// POST /simulate/spike : démarre (ou relance) le scénario de pic de poussière
async fn post_spike(State(app): State<AppState>) -> (StatusCode, Json<TwinView>) {
    let view = {
        let mut twin = app.twin.lock();
        twin.start_spike();
        twin.view()
    };
    (StatusCode::ACCEPTED, Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MaintenanceRule;
    use crate::config::NarrationConf;
    use crate::models::{MetricReading, ReadingSource};
    use crate::speech::SpeechClient;
    use crate::state::new_state;
    use atmosmart_devkit::{ProviderStub, StubResponse};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    fn app_state(api_key: Option<&str>) -> AppState {
        let config = KernelConfig::default();
        let health_tracker = HealthTracker::new();
        let speech = SpeechClient::from_config(&config.narration).with_api_key(None);
        let narration =
            NarrationService::new(speech, &config.narration.voice, health_tracker.clone());
        AppState {
            api_key: api_key.map(str::to_string),
            store: ReadingStore::new(),
            alerts: AlertGenerator::new(config.limits.clone(), MaintenanceRule::default()),
            narrator: Narrator::new(config.limits.clone()),
            narration,
            health_tracker,
            history: new_state(SyntheticSource::new(Some(11))),
            twin: new_state(DigitalTwin::new(Some(12))),
            config: Arc::new(config),
        }
    }

    fn with_readings(state: &AppState, readings: Vec<MetricReading>) {
        state.store.replace(ChannelSnapshot {
            channel: "air".into(),
            readings,
            fetched_at: OffsetDateTime::now_utc(),
            source: ReadingSource::Live,
        });
    }

    async fn call(state: AppState, method: &str, uri: &str, key: Option<&str>) -> Response {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            req = req.header("x-api-key", key);
        }
        build_router(state).oneshot(req.body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn health_is_open_everything_else_needs_the_key() {
        let response = call(app_state(Some(KEY)), "GET", "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");

        let response = call(app_state(Some(KEY)), "GET", "/status", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = call(app_state(Some(KEY)), "GET", "/status", Some("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = call(app_state(Some(KEY)), "GET", "/system/health", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = call(app_state(Some(KEY)), "GET", "/system/health", Some(KEY)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unset_key_denies_access() {
        let response = call(app_state(None), "GET", "/status", Some("anything")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_and_alerts_reflect_the_store() {
        let state = app_state(Some(KEY));
        with_readings(
            &state,
            vec![
                MetricReading::new("AQI", 80.0, "", ReadingSource::Live),
                MetricReading::new("FILTER", 12.0, "%", ReadingSource::Live),
            ],
        );

        let status = body_json(call(state.clone(), "GET", "/status", Some(KEY)).await).await;
        assert_eq!(status["facility_status"], "AtRisk");
        assert_eq!(status["dominant_metric"], "AQI");

        let alerts = body_json(call(state.clone(), "GET", "/alerts", Some(KEY)).await).await;
        let tags: Vec<&str> = alerts
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["metric_key"].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["AQI", "MAINT"]);

        let readings = body_json(call(state, "GET", "/readings", Some(KEY)).await).await;
        assert_eq!(readings[0]["channel"], "air");
        assert_eq!(readings[0]["readings"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn narration_text_and_local_fallback() {
        let state = app_state(Some(KEY));
        with_readings(&state, vec![MetricReading::new("AQI", 30.0, "", ReadingSource::Live)]);

        let response = call(state.clone(), "GET", "/narration/text", Some(KEY)).await;
        let script = body_json(response).await;
        assert_eq!(script["facility_status"], "Compliant");
        let text = script["text"].as_str().unwrap().to_string();
        assert!(text.starts_with("The facility is currently compliant."));

        let response = call(state.clone(), "POST", "/narration", Some(KEY)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let fallback = body_json(response).await;
        assert_eq!(fallback["mode"], "local_speech");
        assert_eq!(fallback["text"], text.as_str());

        let health = body_json(call(state, "GET", "/system/health", Some(KEY)).await).await;
        assert_eq!(health["narration_fallbacks"], 1);
    }

    #[tokio::test]
    async fn narration_while_busy_is_a_conflict() {
        let stub = ProviderStub::start().await.unwrap();
        stub.respond_with(StubResponse::Json(json!({
            "candidates": [{ "content": { "parts": [{ "inlineData": { "data": "AAA=" } }] } }]
        })));
        stub.delay_responses(Duration::from_millis(300));

        let mut state = app_state(Some(KEY));
        let conf = NarrationConf {
            endpoint: stub.base_url(),
            ..state.config.narration.clone()
        };
        let speech = SpeechClient::from_config(&conf).with_api_key(Some("k".into()));
        state.narration = NarrationService::new(speech, &conf.voice, state.health_tracker.clone());

        let first = tokio::spawn(call(state.clone(), "POST", "/narration", Some(KEY)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = call(state.clone(), "POST", "/narration", Some(KEY)).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(second).await["ok"], false);

        let first = first.await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(to_bytes(first.into_body(), usize::MAX).await.unwrap().len(), 44 + 2);
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn spike_simulation_drives_the_twin() {
        let state = app_state(Some(KEY));
        let response = call(state.clone(), "GET", "/twin", Some(KEY)).await;
        assert_eq!(response.headers()[&DATA_SOURCE_HEADER], "synthetic");
        let twin = body_json(response).await;
        assert!(twin["scenario"].is_null());
        assert_eq!(twin["model"]["hvac_mode"], "Eco");
        assert_eq!(twin["mitigation_triggered"], false);

        let response = call(state.clone(), "POST", "/simulate/spike", Some(KEY)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let started = body_json(response).await;
        assert_eq!(started["scenario"]["kind"], "dust_spike");
        assert_eq!(started["scenario"]["tick"], 0);

        state.twin.lock().tick(OffsetDateTime::now_utc());
        let twin = body_json(call(state.clone(), "GET", "/twin", Some(KEY)).await).await;
        assert_eq!(twin["scenario"]["tick"], 1);
        assert_eq!(twin["model"]["hvac_mode"], "High");

        let response = call(state, "POST", "/simulate/spike", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn csv_export_is_flagged_synthetic() {
        let response = call(app_state(Some(KEY)), "GET", "/export/csv", Some(KEY)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[&DATA_SOURCE_HEADER], "synthetic");
        assert!(response.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
        let csv = body_text(response).await;
        assert_eq!(csv.lines().count(), 25);
        assert_eq!(csv.lines().next(), Some(crate::export::CSV_HEADER));
    }

    #[tokio::test]
    async fn report_json_and_text() {
        let state = app_state(Some(KEY));
        with_readings(&state, vec![MetricReading::new("AQI", 150.0, "", ReadingSource::Live)]);

        let report = body_json(call(state.clone(), "GET", "/report", Some(KEY)).await).await;
        assert_eq!(report["site_id"], "ATMO-001");
        assert_eq!(report["facility_status"], "NonCompliant");
        assert_eq!(report["incidents"].as_array().unwrap().len(), 1);

        let text = body_text(call(state, "GET", "/report.txt", Some(KEY)).await).await;
        assert!(text.contains("Executive Status"));
        assert!(text.contains("Active Incidents"));
    }

    #[tokio::test]
    async fn widgets_carry_iframe_urls() {
        let response = call(app_state(Some(KEY)), "GET", "/widgets", Some(KEY)).await;
        let widgets = body_json(response).await;
        let widgets = widgets.as_array().unwrap();
        assert_eq!(widgets.len(), 6);
        assert!(widgets[0]["iframe_src"]
            .as_str()
            .unwrap()
            .starts_with("https://thingspeak.com/channels/3234017/charts/1?"));
    }
}
