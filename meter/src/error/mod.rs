mod meter_error;

pub use meter_error::MeterError;
pub type Result<T> = std::result::Result<T, MeterError>;
