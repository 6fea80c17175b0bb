use crate::directory::{ResyncSummary, TenantDirectory};
use crate::error::Result;
use crate::reporter::{ReporterStats, UsageReporter};
use axum::{
    Router,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Shared handles the admin endpoints read from. Both are `None` when the
/// meter runs without a billing backend.
#[derive(Clone, Default)]
pub struct AppState {
    pub directory: Option<Arc<TenantDirectory>>,
    pub reporter: Option<Arc<UsageReporter>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub metered: bool,
    pub tenants: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryStats {
    pub tenants: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub fronting_host: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub directory: Option<DirectoryStats>,
    pub reporter: Option<ReporterStats>,
}

#[derive(Debug, Serialize)]
pub struct ResyncResponse {
    pub success: bool,
    pub message: String,
    pub summary: Option<ResyncSummary>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(get_stats))
        .route("/api/resync", post(trigger_resync))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on an already bound listener until `shutdown_rx`
/// flips.
pub async fn serve(listener: TcpListener, state: AppState, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;
    info!("Admin API stopped");
    Ok(())
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        metered: state.directory.is_some(),
        tenants: state.directory.as_ref().map_or(0, |d| d.tenant_count()),
    })
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let directory = state.directory.as_ref().map(|directory| {
        let snapshot = directory.snapshot();
        DirectoryStats {
            tenants: snapshot.tenant_count(),
            last_synced_at: snapshot.built_at(),
            fronting_host: snapshot.fronting_host().map(str::to_string),
        }
    });

    Json(StatsResponse {
        directory,
        reporter: state.reporter.as_ref().map(|r| r.stats()),
    })
}

#[instrument(skip(state))]
async fn trigger_resync(State(state): State<AppState>) -> impl IntoResponse {
    let Some(directory) = state.directory.as_ref() else {
        return (
            StatusCode::CONFLICT,
            Json(ResyncResponse {
                success: false,
                message: "No billing backend configured".to_string(),
                summary: None,
            }),
        );
    };

    info!("API: Manual resync requested");
    match directory.resync().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(ResyncResponse {
                success: true,
                message: format!("{} tenants installed", summary.installed),
                summary: Some(summary),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Manual resync failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ResyncResponse {
                    success: false,
                    message: format!("Resync failed: {}", e),
                    summary: None,
                }),
            )
        }
    }
}
