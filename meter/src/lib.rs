pub mod api;
pub mod billing;
pub mod config;
pub mod directory;
pub mod error;
pub mod hook;
pub mod recorder;
pub mod reporter;
pub mod runtime;
pub mod secret;
pub mod tasks;

pub use billing::{BillingApi, BillingClient};
pub use config::MeterConfig;
pub use directory::{TenantDirectory, TenantId};
pub use error::{MeterError, Result};
pub use hook::{ConnectionHook, ConnectionInfo, Direction, SpeedLimit, TenantContext, TenantMode};
pub use recorder::{TrafficRecorder, UsageRecord};
pub use reporter::UsageReporter;
pub use runtime::MeterRuntime;
