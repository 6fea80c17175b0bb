//! Billing backend access.
//!
//! Every call is a single attempt bounded by the client timeout. Retry and
//! batching policy belongs to the callers.

mod client;
mod models;

pub use client::BillingClient;
pub use models::{HeartbeatResponse, MalformedEntry, TenantDescriptor, TenantListing, UsageEntry, UsageReport};

use crate::error::Result;
use crate::recorder::UsageRecord;
use async_trait::async_trait;

#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Current tenant list for this node. Individually malformed entries are
    /// returned aside; an unreadable listing is an error.
    async fn fetch_tenants(&self) -> Result<TenantListing>;

    /// Push one batch of usage records as a single request.
    async fn report_usage(&self, batch: &[UsageRecord]) -> Result<()>;

    /// Liveness signal; returns the status string reported by the backend.
    async fn heartbeat(&self) -> Result<String>;
}
