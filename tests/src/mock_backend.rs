use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use tenant_meter::billing::{TenantDescriptor, UsageEntry, UsageReport};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// In-memory billing panel speaking the same HTTP API as the real one.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<BackendState>,
}

#[derive(Default)]
struct BackendState {
    api_key: String,
    tenants: RwLock<Vec<TenantDescriptor>>,
    tenants_down: AtomicBool,
    usage_failures: AtomicU32,
    usage_attempts: AtomicUsize,
    reports: Mutex<Vec<UsageReport>>,
    heartbeats: AtomicUsize,
    nodes_seen: Mutex<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct NodeQuery {
    node: Option<String>,
    id: Option<String>,
}

impl MockBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            state: Arc::new(BackendState {
                api_key: api_key.into(),
                ..BackendState::default()
            }),
        }
    }

    pub fn set_tenants(&self, tenants: Vec<TenantDescriptor>) {
        *self.state.tenants.write() = tenants;
    }

    /// Answer tenant listings with 500 until switched back.
    pub fn set_tenants_down(&self, down: bool) {
        self.state.tenants_down.store(down, Ordering::SeqCst);
    }

    /// Reject the next `n` usage reports with a 500.
    pub fn fail_next_reports(&self, n: u32) {
        self.state.usage_failures.store(n, Ordering::SeqCst);
    }

    /// Accepted reports, flattened.
    pub fn reported_entries(&self) -> Vec<UsageEntry> {
        self.state
            .reports
            .lock()
            .iter()
            .flat_map(|report| report.data.iter().cloned())
            .collect()
    }

    pub fn accepted_reports(&self) -> usize {
        self.state.reports.lock().len()
    }

    /// Every POST to the usage endpoint, accepted or not.
    pub fn usage_attempts(&self) -> usize {
        self.state.usage_attempts.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }

    pub fn nodes_seen(&self) -> Vec<String> {
        self.state.nodes_seen.lock().clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/tenants", get(list_tenants))
            .route("/usage", post(accept_usage))
            .route("/heartbeat", get(heartbeat))
            .with_state(self.state.clone())
    }

    /// Serve on `addr` in the background and return the bound address.
    pub async fn spawn(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = self.router();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Mock backend error: {}", e);
            }
        });
        info!("Mock billing backend listening on {}", local_addr);
        Ok((local_addr, handle))
    }

    /// Serve on `addr` until the process is stopped.
    pub async fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Mock billing backend listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

impl BackendState {
    fn authorize(&self, headers: &HeaderMap) -> std::result::Result<(), Response> {
        if self.api_key.is_empty() {
            return Ok(());
        }
        let expected = format!("Bearer {}", self.api_key);
        match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some(value) if value == expected => Ok(()),
            _ => Err((StatusCode::UNAUTHORIZED, "invalid api key").into_response()),
        }
    }

    fn note_node(&self, query: &NodeQuery) {
        if let Some(node) = query.node.as_ref().or(query.id.as_ref()) {
            self.nodes_seen.lock().push(node.clone());
        }
    }
}

async fn list_tenants(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(query): Query<NodeQuery>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    state.note_node(&query);
    if state.tenants_down.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "tenant store unavailable").into_response();
    }
    let tenants = state.tenants.read().clone();
    debug!(count = tenants.len(), "Serving tenant list");
    Json(json!({ "data": tenants })).into_response()
}

async fn accept_usage(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(query): Query<NodeQuery>,
    Json(report): Json<UsageReport>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    state.note_node(&query);
    state.usage_attempts.fetch_add(1, Ordering::SeqCst);

    let failing = state
        .usage_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "ret": 0, "msg": "try later" }))).into_response();
    }

    debug!(entries = report.data.len(), "Usage report accepted");
    state.reports.lock().push(report);
    Json(json!({ "ret": 1, "msg": "ok" })).into_response()
}

async fn heartbeat(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(query): Query<NodeQuery>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    state.note_node(&query);
    state.heartbeats.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "status": "ok" })).into_response()
}

/// Load a tenant list for the standalone backend, either a bare array or
/// `{"data": [...]}`.
pub fn load_tenants(path: &str) -> Result<Vec<TenantDescriptor>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Listing {
        Bare(Vec<TenantDescriptor>),
        Envelope { data: Vec<TenantDescriptor> },
    }

    let content = std::fs::read_to_string(path)?;
    Ok(match serde_json::from_str::<Listing>(&content)? {
        Listing::Bare(tenants) | Listing::Envelope { data: tenants } => tenants,
    })
}

/// Tenants served when no file is given.
pub fn sample_tenants() -> Vec<TenantDescriptor> {
    vec![
        TenantDescriptor {
            id: "u1".to_string(),
            credential: "abc123".to_string(),
            port: Some(8443),
            speed_limit_mbps: Some(10),
        },
        TenantDescriptor {
            id: "u2".to_string(),
            credential: "00112233445566778899aabbccddeeff".to_string(),
            port: None,
            speed_limit_mbps: None,
        },
    ]
}
