mod billing_config;
mod meter_config;
mod reporter_config;

pub use billing_config::BillingConfig;
pub use meter_config::{DirectoryConfig, MeterConfig};
pub use reporter_config::ReporterConfig;
