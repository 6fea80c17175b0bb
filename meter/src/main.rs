use anyhow::{Context, Result};
use clap::Parser;
use common::TracingOptions;
use tenant_meter::{MeterConfig, MeterRuntime, api};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "tenant-meter")]
#[command(about = "Tenant Meter - per-tenant usage metering for an MTProto proxy", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, env = "METER_CONFIG", default_value = "meter.toml")]
    config: String,

    /// Admin API listen address
    #[arg(long, env = "METER_API_ADDR")]
    api_addr: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "METER_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = MeterConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    if let Some(api_addr) = args.api_addr {
        cfg.api_listen_addr = Some(api_addr);
    }
    if let Some(log_level) = args.log_level {
        cfg.log_level = log_level;
    }

    let _log_guard = common::init_tracing(&TracingOptions {
        log_dir: cfg.log_dir.as_deref(),
        log_file: "tenant-meter.log",
        log_level: &cfg.log_level,
        console_port: cfg.console_port,
    })
    .context("Failed to initialize tracing")?;

    info!("Starting tenant meter with configuration: {:?}", cfg);

    let runtime = MeterRuntime::start(&cfg)
        .await
        .context("Failed to start metering runtime")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api_server = match &cfg.api_listen_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind admin API on {}", addr))?;
            let state = runtime.api_state();
            Some(tokio::spawn(async move {
                if let Err(e) = api::serve(listener, state, shutdown_rx).await {
                    error!("API server error: {}", e);
                }
            }))
        }
        None => None,
    };

    info!("Tenant meter started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    if let Some(api_server) = api_server {
        let _ = api_server.await;
    }
    runtime.shutdown().await;

    info!("Tenant meter stopped");
    Ok(())
}
