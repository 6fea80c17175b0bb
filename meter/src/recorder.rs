use crate::directory::TenantId;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// One finalized traffic measurement for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub tenant_id: TenantId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

impl UsageRecord {
    pub fn total_bytes(&self) -> u64 {
        self.upload_bytes.saturating_add(self.download_bytes)
    }
}

/// Byte counters for a single live connection.
///
/// Both relay directions may record concurrently. The recorder is finalized
/// once when the connection ends and is not reused afterwards.
#[derive(Debug)]
pub struct TrafficRecorder {
    tenant_id: TenantId,
    start: DateTime<Utc>,
    upload: AtomicU64,
    download: AtomicU64,
}

impl TrafficRecorder {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            start: Utc::now(),
            upload: AtomicU64::new(0),
            download: AtomicU64::new(0),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn record_upload(&self, bytes: u64) {
        self.upload.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_download(&self, bytes: u64) {
        self.download.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn upload_bytes(&self) -> u64 {
        self.upload.load(Ordering::Relaxed)
    }

    pub fn download_bytes(&self) -> u64 {
        self.download.load(Ordering::Relaxed)
    }

    pub fn finalize(&self) -> UsageRecord {
        UsageRecord {
            tenant_id: self.tenant_id.clone(),
            start: self.start,
            end: Utc::now(),
            upload_bytes: self.upload_bytes(),
            download_bytes: self.download_bytes(),
        }
    }
}
