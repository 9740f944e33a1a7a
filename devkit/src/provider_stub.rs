/*!
Stub HTTP des fournisseurs externes

Serveur axum local (port éphémère) qui répond à n'importe quel chemin avec
la réponse configurée. Sert de fournisseur de télémétrie façon ThingSpeak
(`/channels/{id}/feeds/last.json`) comme de backend de synthèse vocale.
Enregistre le nombre d'appels, le dernier chemin, la query et le corps.
*/

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum StubResponse {
    /// 200 avec un corps JSON
    Json(Value),
    /// Code HTTP seul
    Status(u16),
    /// 200 avec un corps texte arbitraire
    Raw(String),
}

struct StubState {
    response: Mutex<StubResponse>,
    delay: Mutex<Duration>,
    hits: AtomicUsize,
    last_path: Mutex<Option<String>>,
    last_query: Mutex<Option<String>>,
    last_body: Mutex<Option<Bytes>>,
}

pub struct ProviderStub {
    addr: SocketAddr,
    state: Arc<StubState>,
    server: JoinHandle<()>,
}

impl ProviderStub {
    /// Démarre le stub; répond `{}` tant que rien n'est configuré.
    pub async fn start() -> Result<Self> {
        let state = Arc::new(StubState {
            response: Mutex::new(StubResponse::Json(Value::Object(Map::new()))),
            delay: Mutex::new(Duration::ZERO),
            hits: AtomicUsize::new(0),
            last_path: Mutex::new(None),
            last_query: Mutex::new(None),
            last_body: Mutex::new(None),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = Router::new().fallback(handle).with_state(state.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [STUB] server stopped: {}", e);
            }
        });
        log::info!("🧪 [STUB] provider listening on {}", addr);

        Ok(Self { addr, state, server })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn respond_with(&self, response: StubResponse) {
        *self.state.response.lock() = response;
    }

    /// Retarde chaque réponse (requêtes concurrentes, timeouts)
    pub fn delay_responses(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn last_path(&self) -> Option<String> {
        self.state.last_path.lock().clone()
    }

    pub fn last_query(&self) -> Option<String> {
        self.state.last_query.lock().clone()
    }

    pub fn last_body_json(&self) -> Option<Value> {
        let body = self.state.last_body.lock().clone()?;
        serde_json::from_slice(&body).ok()
    }
}

impl Drop for ProviderStub {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn handle(State(state): State<Arc<StubState>>, uri: Uri, body: Bytes) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_path.lock() = Some(uri.path().to_string());
    *state.last_query.lock() = uri.query().map(str::to_string);
    *state.last_body.lock() = Some(body);

    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let response = state.response.lock().clone();
    match response {
        StubResponse::Json(value) => Json(value).into_response(),
        StubResponse::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        StubResponse::Raw(text) => ([(header::CONTENT_TYPE, "text/html")], text).into_response(),
    }
}

/// Construit une dernière entrée de canal ThingSpeak : les champs sont des
/// chaînes, `null` quand le capteur n'a rien envoyé.
pub struct ChannelFeedBuilder {
    entry_id: u64,
    fields: BTreeMap<u8, Value>,
}

impl ChannelFeedBuilder {
    pub fn new(entry_id: u64) -> Self {
        Self {
            entry_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, n: u8, value: f64) -> Self {
        self.fields.insert(n, Value::String(value.to_string()));
        self
    }

    pub fn null_field(mut self, n: u8) -> Self {
        self.fields.insert(n, Value::Null);
        self
    }

    pub fn build(self) -> Value {
        let mut entry = Map::new();
        entry.insert("created_at".into(), Value::String(chrono::Utc::now().to_rfc3339()));
        entry.insert("entry_id".into(), Value::from(self.entry_id));
        for (n, value) in self.fields {
            entry.insert(format!("field{n}"), value);
        }
        Value::Object(entry)
    }
}
