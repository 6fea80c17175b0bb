//! Tenant directory: credential, port and speed-limit lookups that are
//! replaced wholesale on every resync.

mod snapshot;

pub use snapshot::{DirectorySnapshot, Tenant, mbps_to_bytes_per_sec};

use crate::billing::BillingApi;
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Opaque tenant identifier, cheap to clone into every connection.
pub type TenantId = Arc<str>;

/// Outcome of one successful resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncSummary {
    pub installed: usize,
    pub skipped: usize,
    pub added: usize,
    pub removed: usize,
}

pub struct TenantDirectory {
    api: Arc<dyn BillingApi>,
    /// Held only to clone or replace the pointer, never across I/O.
    current: RwLock<Arc<DirectorySnapshot>>,
    /// Serialises resyncs so a slow fetch cannot overwrite a newer one.
    resync_lock: tokio::sync::Mutex<()>,
}

impl TenantDirectory {
    pub fn new(api: Arc<dyn BillingApi>) -> Self {
        Self {
            api,
            current: RwLock::new(Arc::new(DirectorySnapshot::default())),
            resync_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The live snapshot. Callers doing several lookups should take it once.
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.current.read().clone()
    }

    pub fn resolve_by_credential(&self, credential: &str) -> Option<TenantId> {
        self.snapshot().resolve_by_credential(credential)
    }

    pub fn resolve_by_port(&self, port: u16) -> Option<TenantId> {
        self.snapshot().resolve_by_port(port)
    }

    /// Credential first, dedicated port as the fallback.
    pub fn resolve(&self, credential: Option<&str>, port: u16) -> Option<TenantId> {
        let snapshot = self.snapshot();
        credential
            .and_then(|credential| snapshot.resolve_by_credential(credential))
            .or_else(|| snapshot.resolve_by_port(port))
    }

    /// Bytes per second, 0 for unlimited. `None` for unknown tenants.
    pub fn speed_limit(&self, tenant_id: &str) -> Option<u64> {
        self.snapshot().speed_limit(tenant_id)
    }

    pub fn tenant_count(&self) -> usize {
        self.snapshot().tenant_count()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot().built_at()
    }

    pub fn fronting_host(&self) -> Option<String> {
        self.snapshot().fronting_host().map(str::to_string)
    }

    /// Fetch the tenant list and install a freshly built snapshot.
    ///
    /// On fetch failure the previous snapshot stays live and the error is
    /// returned.
    #[instrument(skip(self))]
    pub async fn resync(&self) -> Result<ResyncSummary> {
        let _guard = self.resync_lock.lock().await;

        let listing = self.api.fetch_tenants().await?;
        let outcome = DirectorySnapshot::from_listing(&listing);
        let fresh = Arc::new(outcome.snapshot);

        let previous = std::mem::replace(&mut *self.current.write(), fresh.clone());

        let summary = ResyncSummary {
            installed: fresh.tenant_count(),
            skipped: outcome.skipped,
            added: fresh.tenant_ids().filter(|id| !previous.contains(id)).count(),
            removed: previous.tenant_ids().filter(|id| !fresh.contains(id)).count(),
        };

        if summary.skipped > 0 {
            warn!(skipped = summary.skipped, "Some tenant entries were skipped");
        }
        if summary.added > 0 || summary.removed > 0 {
            info!(
                added = summary.added,
                removed = summary.removed,
                total = summary.installed,
                "Tenant directory updated"
            );
        }

        Ok(summary)
    }
}
