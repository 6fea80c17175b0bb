use crate::secret::SecretError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Billing backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed billing response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Billing backend rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid secret: {0}")]
    InvalidSecret(#[from] SecretError),

    #[error("Invalid tenant {id:?}: {reason}")]
    InvalidTenant { id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
