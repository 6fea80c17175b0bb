use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter '{filter}': {reason}")]
    LogFilter { filter: String, reason: String },

    #[error("Tracing already initialized: {0}")]
    TracingInit(String),
}
