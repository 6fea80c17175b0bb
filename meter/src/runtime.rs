use crate::api::AppState;
use crate::billing::{BillingApi, BillingClient};
use crate::config::MeterConfig;
use crate::directory::TenantDirectory;
use crate::error::Result;
use crate::hook::{ConnectionHook, TenantMode};
use crate::reporter::UsageReporter;
use crate::tasks::{BackgroundTasks, BackgroundTasksHandle};
use std::sync::Arc;
use tracing::{info, warn};

/// Owns every metering component and tears them down in order.
pub struct MeterRuntime {
    hook: ConnectionHook,
    state: AppState,
    tasks: Option<BackgroundTasksHandle>,
}

impl MeterRuntime {
    /// Build the runtime from configuration. Without a `[billing]` section the
    /// meter runs in static mode and never talks to a backend.
    pub async fn start(config: &MeterConfig) -> Result<Self> {
        let Some(billing) = &config.billing else {
            info!("No billing backend configured, running in static mode");
            return Ok(Self {
                hook: ConnectionHook::new(TenantMode::Static),
                state: AppState::default(),
                tasks: None,
            });
        };

        let client = BillingClient::new(billing)?;
        info!(base_url = %billing.base_url, node_id = %client.node_id(), "Billing backend configured");
        Ok(Self::with_api(Arc::new(client), config).await)
    }

    /// Build a dynamic-mode runtime on any billing implementation.
    pub async fn with_api(api: Arc<dyn BillingApi>, config: &MeterConfig) -> Self {
        let directory = Arc::new(TenantDirectory::new(api.clone()));
        match directory.resync().await {
            Ok(summary) => info!(tenants = summary.installed, skipped = summary.skipped, "Initial tenant sync complete"),
            Err(e) => warn!(error = %e, "Initial tenant sync failed, starting with an empty directory"),
        }

        let reporter = UsageReporter::start(api.clone(), &config.reporter);
        let tasks = BackgroundTasks::new(directory.clone(), api, &config.directory).start();

        Self {
            hook: ConnectionHook::new(TenantMode::Dynamic {
                directory: directory.clone(),
                reporter: reporter.clone(),
            }),
            state: AppState {
                directory: Some(directory),
                reporter: Some(reporter),
            },
            tasks: Some(tasks),
        }
    }

    pub fn hook(&self) -> ConnectionHook {
        self.hook.clone()
    }

    pub fn api_state(&self) -> AppState {
        self.state.clone()
    }

    /// Stop the loops first so no resync races the final usage flush.
    pub async fn shutdown(self) {
        if let Some(tasks) = self.tasks {
            tasks.shutdown().await;
        }
        if let Some(reporter) = &self.state.reporter {
            reporter.shutdown().await;
            let stats = reporter.stats();
            info!(
                delivered_records = stats.delivered_records,
                dropped_records = stats.dropped_records,
                "Usage reporter stopped"
            );
        }
    }
}
