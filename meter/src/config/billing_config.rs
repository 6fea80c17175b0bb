use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Base URL the `tenants`, `usage` and `heartbeat` paths are appended to.
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    pub node_id: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl BillingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for BillingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BillingConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("node_id", &self.node_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}
