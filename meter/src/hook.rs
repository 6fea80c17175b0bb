//! Per-connection integration points for the relay.
//!
//! The proxy calls [`ConnectionHook::on_connection_start`] once it knows the
//! client's credential and the local port, reports every relayed chunk
//! through the returned [`TenantContext`], and hands the context back to
//! [`ConnectionHook::on_connection_end`] when the stream closes. A `None`
//! context means the connection is unmetered and unlimited.

use crate::directory::{TenantDirectory, TenantId};
use crate::recorder::TrafficRecorder;
use crate::reporter::UsageReporter;
use common::{BandwidthLimiter, format_bytes};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{Span, debug, info_span};

/// How connections are attributed to tenants, decided once at startup.
#[derive(Clone)]
pub enum TenantMode {
    /// One shared secret; every connection is anonymous.
    Static,
    Dynamic {
        directory: Arc<TenantDirectory>,
        reporter: Arc<UsageReporter>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client towards the upstream.
    Upload,
    /// Upstream towards the client.
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedLimit {
    Unlimited,
    BytesPerSec(u64),
}

impl SpeedLimit {
    pub fn from_bytes_per_sec(bytes_per_sec: u64) -> Self {
        if bytes_per_sec == 0 {
            Self::Unlimited
        } else {
            Self::BytesPerSec(bytes_per_sec)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    Credential,
    Port,
}

/// What the proxy knows about a connection when it starts.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo<'a> {
    pub stream_id: &'a str,
    pub client_addr: SocketAddr,
    pub local_port: u16,
    /// Secret presented by the client, in whatever encoding it used.
    pub credential: Option<&'a str>,
}

/// Cloneable handle the two relay directions record through.
#[derive(Debug, Clone)]
pub struct TrafficMeter(Arc<TrafficRecorder>);

impl TrafficMeter {
    pub fn record(&self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Upload => self.0.record_upload(bytes),
            Direction::Download => self.0.record_download(bytes),
        }
    }

    pub fn upload_bytes(&self) -> u64 {
        self.0.upload_bytes()
    }

    pub fn download_bytes(&self) -> u64 {
        self.0.download_bytes()
    }
}

/// State attached to a connection that resolved to a tenant.
pub struct TenantContext {
    resolved_by: ResolvedBy,
    speed_limit: SpeedLimit,
    limiter: Option<BandwidthLimiter>,
    meter: TrafficMeter,
    span: Span,
}

impl TenantContext {
    pub fn tenant_id(&self) -> &TenantId {
        self.meter.0.tenant_id()
    }

    pub fn resolved_by(&self) -> ResolvedBy {
        self.resolved_by
    }

    pub fn speed_limit(&self) -> SpeedLimit {
        self.speed_limit
    }

    /// Token bucket shared by both directions, when the tenant is limited.
    pub fn limiter(&self) -> Option<BandwidthLimiter> {
        self.limiter.clone()
    }

    pub fn meter(&self) -> TrafficMeter {
        self.meter.clone()
    }

    /// Span carrying the stream and tenant identity.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[derive(Clone)]
pub struct ConnectionHook {
    mode: TenantMode,
}

impl ConnectionHook {
    pub fn new(mode: TenantMode) -> Self {
        Self { mode }
    }

    pub fn is_metered(&self) -> bool {
        matches!(self.mode, TenantMode::Dynamic { .. })
    }

    pub fn on_connection_start(&self, connection: &ConnectionInfo<'_>) -> Option<TenantContext> {
        let TenantMode::Dynamic { directory, .. } = &self.mode else {
            return None;
        };

        // One snapshot for every lookup of this connection.
        let snapshot = directory.snapshot();
        let (tenant_id, resolved_by) = match connection
            .credential
            .and_then(|credential| snapshot.resolve_by_credential(credential))
        {
            Some(tenant_id) => (tenant_id, ResolvedBy::Credential),
            None => (
                snapshot.resolve_by_port(connection.local_port)?,
                ResolvedBy::Port,
            ),
        };

        let speed_limit =
            SpeedLimit::from_bytes_per_sec(snapshot.speed_limit(&tenant_id).unwrap_or(0));
        let limiter = match speed_limit {
            SpeedLimit::Unlimited => None,
            SpeedLimit::BytesPerSec(rate) => Some(BandwidthLimiter::new(rate)),
        };

        let span = info_span!(
            "stream",
            stream_id = %connection.stream_id,
            client_ip = %connection.client_addr.ip(),
            tenant_id = %tenant_id,
        );
        span.in_scope(|| {
            debug!(?resolved_by, ?speed_limit, local_port = connection.local_port, "Tenant resolved");
        });

        Some(TenantContext {
            meter: TrafficMeter(Arc::new(TrafficRecorder::new(tenant_id))),
            resolved_by,
            speed_limit,
            limiter,
            span,
        })
    }

    pub fn on_bytes_transferred(&self, context: &TenantContext, direction: Direction, bytes: u64) {
        context.meter.record(direction, bytes);
    }

    /// Finalize the connection's traffic and queue it for billing.
    pub fn on_connection_end(&self, context: TenantContext) {
        let TenantMode::Dynamic { reporter, .. } = &self.mode else {
            return;
        };

        let record = context.meter.0.finalize();
        context.span.in_scope(|| {
            debug!(
                upload = %format_bytes(record.upload_bytes),
                download = %format_bytes(record.download_bytes),
                "Stream usage recorded"
            );
        });
        reporter.submit(record);
    }
}
