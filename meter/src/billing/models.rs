use crate::recorder::UsageRecord;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A tenant as listed by the billing backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDescriptor {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(alias = "passwd")]
    pub credential: String,

    /// Dedicated listening port; absent or 0 when the tenant has none.
    #[serde(default)]
    pub port: Option<i64>,

    /// Megabits per second; absent, 0 or negative means unlimited.
    #[serde(default, rename = "speedLimitMbps", alias = "node_speedlimit")]
    pub speed_limit_mbps: Option<i64>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(i64),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(text) => text,
        Repr::Number(number) => number.to_string(),
    })
}

/// A tenant listing decoded entry by entry.
///
/// Entries that do not match [`TenantDescriptor`] land in `malformed` so the
/// rest of the listing still applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantListing {
    pub tenants: Vec<TenantDescriptor>,
    pub malformed: Vec<MalformedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    /// The entry's `id`, when it carried a readable one.
    pub id: Option<String>,
    pub reason: String,
}

impl From<Vec<TenantDescriptor>> for TenantListing {
    fn from(tenants: Vec<TenantDescriptor>) -> Self {
        Self {
            tenants,
            malformed: Vec::new(),
        }
    }
}

impl TenantListing {
    /// Parse a bare array or `{"data": [...]}`. Only a body that is neither
    /// is an error.
    pub(crate) fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        let entries = match serde_json::from_slice::<Value>(bytes)? {
            Value::Array(entries) => entries,
            Value::Object(mut body) => match body.remove("data") {
                Some(Value::Array(entries)) => entries,
                _ => return Err(<serde_json::Error as serde::de::Error>::custom("expected a `data` array of tenants")),
            },
            _ => return Err(<serde_json::Error as serde::de::Error>::custom("expected an array of tenants")),
        };

        let mut listing = Self::default();
        for entry in entries {
            let id = entry.get("id").and_then(|id| match id {
                Value::String(text) => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            });
            match serde_json::from_value::<TenantDescriptor>(entry) {
                Ok(tenant) => listing.tenants.push(tenant),
                Err(e) => listing.malformed.push(MalformedEntry {
                    id,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(listing)
    }
}

/// Usage entry as the backend expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub user_id: String,
    /// Upload bytes
    pub u: u64,
    /// Download bytes
    pub d: u64,
}

impl From<&UsageRecord> for UsageEntry {
    fn from(record: &UsageRecord) -> Self {
        Self {
            user_id: record.tenant_id.to_string(),
            u: record.upload_bytes,
            d: record.download_bytes,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageReport {
    pub data: Vec<UsageEntry>,
}

impl UsageReport {
    pub fn from_records(records: &[UsageRecord]) -> Self {
        Self {
            data: records.iter().map(UsageEntry::from).collect(),
        }
    }
}

/// Acknowledgement body of a usage report.
///
/// The backend signals success either with `{"ret": 1}` or with
/// `{"success": true}`; an explicit `success` wins over `ret`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Acknowledgement {
    #[serde(default)]
    ret: Option<i64>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, alias = "message")]
    msg: Option<String>,
}

impl Acknowledgement {
    pub(crate) fn is_success(&self) -> bool {
        match (self.success, self.ret) {
            (Some(success), _) => success,
            (None, Some(ret)) => ret == 1,
            (None, None) => false,
        }
    }

    pub(crate) fn message(&self) -> String {
        self.msg
            .clone()
            .unwrap_or_else(|| "no success indicator in response".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
}
