pub mod bandwidth;
pub mod error;

pub use bandwidth::BandwidthLimiter;
pub use error::{CommonError, Result};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Where and how verbosely the process logs.
#[derive(Debug, Clone)]
pub struct TracingOptions<'a> {
    /// Directory for daily rolling log files; stdout when `None`.
    pub log_dir: Option<&'a str>,
    pub log_file: &'a str,
    /// Fallback filter used when `RUST_LOG` is not set.
    pub log_level: &'a str,
    /// tokio-console port, honoured only with the `console` feature.
    pub console_port: Option<u16>,
}

pub fn init_tracing(options: &TracingOptions<'_>) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(options.log_level).map_err(|e| CommonError::LogFilter {
            filter: options.log_level.to_string(),
            reason: e.to_string(),
        })?,
    };

    #[cfg(feature = "console")]
    let console_layer = options.console_port.map(|port| {
        console_subscriber::ConsoleLayer::builder()
            .server_addr((std::net::Ipv4Addr::LOCALHOST, port))
            .spawn()
    });

    #[cfg(not(feature = "console"))]
    let console_layer: Option<tracing_subscriber::layer::Identity> = {
        if options.console_port.is_some() {
            eprintln!(
                "console_port is configured but the binary is not built with --features console; tokio-console is disabled"
            );
        }
        None
    };

    let (file_layer, guard) = match options.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, options.log_file);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = options.log_dir.is_none().then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_ansi(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| CommonError::TracingInit(e.to_string()))?;

    Ok(guard)
}

/// Format bytes into human-readable string (KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
