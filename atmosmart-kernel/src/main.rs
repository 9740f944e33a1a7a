/**
 * ATMOSMART KERNEL - Point d'entrée du serveur
 *
 * RÔLE : charge la config, démarre un poller par canal de télémétrie,
 * le publisher MQTT (si configuré), le jumeau numérique et l'API HTTP.
 */

use anyhow::{Context, Result};
use atmosmart_kernel::alerts::AlertGenerator;
use atmosmart_kernel::config::load_config;
use atmosmart_kernel::health::HealthTracker;
use atmosmart_kernel::http::{build_router, AppState};
use atmosmart_kernel::mqtt::StatusPublisher;
use atmosmart_kernel::narration::Narrator;
use atmosmart_kernel::speech::{NarrationService, SpeechClient};
use atmosmart_kernel::state::{new_state, ReadingStore};
use atmosmart_kernel::synthetic::SyntheticSource;
use atmosmart_kernel::telemetry::{spawn_pollers, TelemetryReader};
use atmosmart_kernel::twin::{spawn_twin, DigitalTwin, TWIN_PERIOD};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("atmosmart_kernel=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config().await.context("loading configuration")?;
    let poll_period = Duration::from_secs(config.poll_interval_secs);

    let store = ReadingStore::new();
    let health_tracker = HealthTracker::new();
    let alerts = AlertGenerator::new(config.limits.clone(), config.maintenance.clone());

    // un poller par canal
    let pollers = spawn_pollers(
        TelemetryReader::new(),
        config.channels.clone(),
        poll_period,
        config.seed,
        store.clone(),
        health_tracker.clone(),
    );
    info!(
        channels = pollers.len(),
        every_secs = config.poll_interval_secs,
        "telemetry pollers started"
    );

    match &config.mqtt {
        Some(mqtt) => {
            StatusPublisher::new(
                &config.site_id,
                config.limits.clone(),
                alerts.clone(),
                store.clone(),
                health_tracker.clone(),
            )
            .spawn(mqtt.clone(), poll_period);
        }
        None => info!("no mqtt section, facility events disabled"),
    }

    let twin = new_state(DigitalTwin::new(config.seed));
    spawn_twin(twin.clone(), TWIN_PERIOD);

    let speech = SpeechClient::from_config(&config.narration);
    if !speech.has_credential() {
        warn!(
            env = %config.narration.api_key_env,
            "no speech API key, narration will use the local fallback"
        );
    }
    let narration = NarrationService::new(speech, &config.narration.voice, health_tracker.clone());

    let api_key = std::env::var("ATMOSMART_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("SECURITY: ATMOSMART_API_KEY not set - API access denied");
    }

    let bind = config.http.bind.clone();
    let app_state = AppState {
        api_key,
        store,
        alerts,
        narrator: Narrator::new(config.limits.clone()),
        narration,
        health_tracker,
        history: new_state(SyntheticSource::new(config.seed)),
        twin,
        config: Arc::new(config),
    };
    let app = build_router(app_state);

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding HTTP listener on {bind}"))?;
    info!("listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}
