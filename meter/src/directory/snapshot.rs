use super::TenantId;
use crate::billing::{TenantDescriptor, TenantListing};
use crate::error::{MeterError, Result};
use crate::secret::Secret;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::warn;

/// A billing-relevant identity, rebuilt wholesale on every resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: TenantId,
    pub credential: String,
    pub bound_port: Option<u16>,
    /// 0 means unlimited.
    pub speed_limit_bytes_per_sec: u64,
}

/// Bytes per mebibyte; the panel's "Mbps" limit is applied as MiB/s.
const BYTES_PER_SPEED_UNIT: u64 = 1024 * 1024;

/// Speed limit as sent by the panel to bytes per second.
pub fn mbps_to_bytes_per_sec(mbps: i64) -> u64 {
    u64::try_from(mbps)
        .map(|mbps| mbps.saturating_mul(BYTES_PER_SPEED_UNIT))
        .unwrap_or(0)
}

impl Tenant {
    pub fn from_descriptor(descriptor: &TenantDescriptor) -> Result<(Self, Secret)> {
        let id = descriptor.id.trim();
        if id.is_empty() {
            return Err(MeterError::InvalidTenant {
                id: descriptor.id.clone(),
                reason: "empty id".to_string(),
            });
        }

        let secret = Secret::parse(&descriptor.credential)?;

        let bound_port = match descriptor.port {
            None | Some(0) => None,
            Some(port) => Some(u16::try_from(port).map_err(|_| MeterError::InvalidTenant {
                id: id.to_string(),
                reason: format!("port {port} out of range"),
            })?),
        };

        let tenant = Self {
            id: id.into(),
            credential: descriptor.credential.trim().to_string(),
            bound_port,
            speed_limit_bytes_per_sec: descriptor.speed_limit_mbps.map_or(0, mbps_to_bytes_per_sec),
        };
        Ok((tenant, secret))
    }
}

/// One immutable copy of the tenant directory.
#[derive(Debug, Default)]
pub struct DirectorySnapshot {
    by_credential: HashMap<String, TenantId>,
    by_port: HashMap<u16, TenantId>,
    speed_limits: HashMap<TenantId, u64>,
    fronting_host: Option<String>,
    built_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub(crate) struct BuildOutcome {
    pub snapshot: DirectorySnapshot,
    pub skipped: usize,
}

impl DirectorySnapshot {
    /// Build from a fetched listing; entries that failed to decode count as
    /// skipped alongside the ones [`Self::build`] rejects.
    pub(crate) fn from_listing(listing: &TenantListing) -> BuildOutcome {
        for entry in &listing.malformed {
            warn!(
                tenant_id = entry.id.as_deref().unwrap_or("<none>"),
                reason = %entry.reason,
                "Skipping undecodable tenant entry"
            );
        }
        let mut outcome = Self::build(&listing.tenants);
        outcome.skipped += listing.malformed.len();
        outcome
    }

    /// Build a snapshot from tenant descriptors. Malformed or duplicate
    /// entries are logged and skipped; they never fail the build.
    pub(crate) fn build(descriptors: &[TenantDescriptor]) -> BuildOutcome {
        let mut snapshot = Self {
            by_credential: HashMap::with_capacity(descriptors.len() * 3),
            by_port: HashMap::new(),
            speed_limits: HashMap::with_capacity(descriptors.len()),
            fronting_host: None,
            built_at: Some(Utc::now()),
        };
        let mut skipped = 0;

        for descriptor in descriptors {
            let (tenant, secret) = match Tenant::from_descriptor(descriptor) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(tenant_id = %descriptor.id, error = %e, "Skipping malformed tenant entry");
                    skipped += 1;
                    continue;
                }
            };

            match snapshot.speed_limits.entry(tenant.id.clone()) {
                Entry::Occupied(_) => {
                    warn!(tenant_id = %tenant.id, "Skipping duplicate tenant entry");
                    skipped += 1;
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(tenant.speed_limit_bytes_per_sec);
                }
            }

            snapshot.bind_credential(&tenant, &secret);

            if let Some(port) = tenant.bound_port {
                match snapshot.by_port.entry(port) {
                    Entry::Occupied(owner) => {
                        warn!(tenant_id = %tenant.id, port, owner = %owner.get(), "Port already bound, ignoring");
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(tenant.id.clone());
                    }
                }
            }

            if snapshot.fronting_host.is_none() {
                snapshot.fronting_host = secret.host().map(str::to_string);
            }
        }

        BuildOutcome { snapshot, skipped }
    }

    fn bind_credential(&mut self, tenant: &Tenant, secret: &Secret) {
        let canonical = secret.hex();
        if let Some(owner) = self.by_credential.get(&canonical) {
            warn!(tenant_id = %tenant.id, owner = %owner, "Credential already in use, ignoring");
            return;
        }

        let mut keys = secret.encodings();
        keys.push(tenant.credential.clone());
        for key in keys {
            self.by_credential.entry(key).or_insert_with(|| tenant.id.clone());
        }
    }

    /// Resolve a credential in any accepted encoding.
    pub fn resolve_by_credential(&self, credential: &str) -> Option<TenantId> {
        let credential = credential.trim();
        if let Some(id) = self.by_credential.get(credential) {
            return Some(id.clone());
        }
        // Encodings not precomputed, e.g. upper-case hex, go through the
        // canonical form.
        let secret = Secret::parse(credential).ok()?;
        self.by_credential.get(&secret.hex()).cloned()
    }

    pub fn resolve_by_port(&self, port: u16) -> Option<TenantId> {
        self.by_port.get(&port).cloned()
    }

    pub fn speed_limit(&self, tenant_id: &str) -> Option<u64> {
        self.speed_limits.get(tenant_id).copied()
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.speed_limits.contains_key(tenant_id)
    }

    pub fn tenant_ids(&self) -> impl Iterator<Item = &TenantId> {
        self.speed_limits.keys()
    }

    pub fn tenant_count(&self) -> usize {
        self.speed_limits.len()
    }

    pub fn fronting_host(&self) -> Option<&str> {
        self.fronting_host.as_deref()
    }

    /// `None` for the empty snapshot installed before the first resync.
    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }
}
