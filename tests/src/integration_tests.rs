use crate::mock_backend::{MockBackend, sample_tenants};
use anyhow::{Result, anyhow, bail, ensure};
use std::future::Future;
use std::time::{Duration, Instant};
use tenant_meter::billing::TenantDescriptor;
use tenant_meter::config::{BillingConfig, DirectoryConfig, ReporterConfig};
use tenant_meter::{ConnectionInfo, Direction, MeterConfig, MeterRuntime, SpeedLimit};
use tokio::task::JoinHandle;
use tracing::{error, info};

const API_KEY: &str = "integration-key";
const NODE_ID: &str = "7";

pub struct IntegrationTestResults {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub test_details: Vec<TestResult>,
}

pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
    pub duration_ms: u128,
}

/// Run every scenario, each against its own in-process billing backend.
pub async fn run_all_scenarios() -> IntegrationTestResults {
    info!("=== Starting Metering Scenarios ===");

    let mut results = IntegrationTestResults {
        total_tests: 0,
        passed: 0,
        failed: 0,
        test_details: Vec::new(),
    };

    results.add_test(run_scenario("End-to-end usage", end_to_end_usage()).await);
    results.add_test(run_scenario("Retry exhaustion drops batch", retry_exhaustion_drops_batch()).await);
    results.add_test(run_scenario("Failed resync keeps directory", failed_resync_keeps_directory()).await);
    results.add_test(run_scenario("Wrong API key leaves directory empty", wrong_api_key_leaves_directory_empty()).await);
    results.add_test(run_scenario("Shutdown drains pending usage", shutdown_drains_pending_usage()).await);

    info!("=== Metering Scenarios Complete ===");
    info!(
        "Total: {}, Passed: {}, Failed: {}",
        results.total_tests, results.passed, results.failed
    );

    results
}

impl IntegrationTestResults {
    fn add_test(&mut self, result: TestResult) {
        self.total_tests += 1;
        if result.passed {
            self.passed += 1;
            info!("✓ {} - PASSED ({} ms)", result.name, result.duration_ms);
        } else {
            self.failed += 1;
            error!(
                "✗ {} - FAILED: {}",
                result.name,
                result.error.as_deref().unwrap_or("Unknown error")
            );
        }
        self.test_details.push(result);
    }
}

async fn run_scenario(name: &str, scenario: impl Future<Output = Result<()>>) -> TestResult {
    let start = Instant::now();
    let outcome = scenario.await;
    TestResult {
        name: name.to_string(),
        passed: outcome.is_ok(),
        error: outcome.err().map(|e| format!("{:#}", e)),
        duration_ms: start.elapsed().as_millis(),
    }
}

struct Harness {
    backend: MockBackend,
    server: JoinHandle<()>,
    base_url: String,
}

impl Harness {
    async fn start() -> Result<Self> {
        let backend = MockBackend::new(API_KEY);
        backend.set_tenants(sample_tenants());
        let (addr, server) = backend.spawn("127.0.0.1:0").await?;
        Ok(Self {
            backend,
            server,
            base_url: format!("http://{}", addr),
        })
    }

    fn config(&self, api_key: &str, batch_size: usize) -> MeterConfig {
        MeterConfig {
            log_level: "info".to_string(),
            log_dir: None,
            api_listen_addr: None,
            console_port: None,
            billing: Some(BillingConfig {
                base_url: self.base_url.clone(),
                api_key: api_key.to_string(),
                node_id: NODE_ID.to_string(),
                request_timeout_secs: 5,
            }),
            directory: DirectoryConfig::default(),
            reporter: ReporterConfig {
                batch_size,
                flush_interval_secs: 60,
                max_attempts: 3,
                backoff_base_ms: 10,
            },
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn connection(credential: Option<&str>, local_port: u16) -> ConnectionInfo<'_> {
    ConnectionInfo {
        stream_id: "it-stream",
        client_addr: ([198, 51, 100, 1], 40000).into(),
        local_port,
        credential,
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            bail!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// u1 / abc123 / port 8443 / 10 Mbps: the credential resolves, traffic is
/// counted and one report carrying it reaches the backend.
pub async fn end_to_end_usage() -> Result<()> {
    let harness = Harness::start().await?;
    let runtime = MeterRuntime::start(&harness.config(API_KEY, 1)).await?;
    let hook = runtime.hook();

    let context = hook
        .on_connection_start(&connection(Some("abc123"), 443))
        .ok_or_else(|| anyhow!("credential did not resolve"))?;
    ensure!(&**context.tenant_id() == "u1", "resolved to {}", context.tenant_id());
    ensure!(
        context.speed_limit() == SpeedLimit::BytesPerSec(10_485_760),
        "unexpected speed limit {:?}",
        context.speed_limit()
    );

    hook.on_bytes_transferred(&context, Direction::Upload, 400);
    hook.on_bytes_transferred(&context, Direction::Download, 2000);
    hook.on_bytes_transferred(&context, Direction::Upload, 600);
    hook.on_connection_end(context);

    let backend = harness.backend.clone();
    wait_until("usage report", || backend.accepted_reports() == 1).await?;
    wait_until("heartbeat", || backend.heartbeats() >= 1).await?;

    let entries = harness.backend.reported_entries();
    ensure!(entries.len() == 1, "expected one entry, got {:?}", entries);
    ensure!(
        entries[0].user_id == "u1" && entries[0].u == 1000 && entries[0].d == 2000,
        "unexpected entry {:?}",
        entries[0]
    );
    ensure!(
        harness.backend.nodes_seen().iter().all(|node| node == NODE_ID),
        "unexpected node ids {:?}",
        harness.backend.nodes_seen()
    );

    runtime.shutdown().await;
    Ok(())
}

/// Three rejected attempts drop the batch; the next report carries only new
/// usage.
pub async fn retry_exhaustion_drops_batch() -> Result<()> {
    let harness = Harness::start().await?;
    harness.backend.fail_next_reports(3);
    let runtime = MeterRuntime::start(&harness.config(API_KEY, 1)).await?;
    let hook = runtime.hook();
    let reporter = runtime
        .api_state()
        .reporter
        .ok_or_else(|| anyhow!("runtime has no reporter"))?;

    let context = hook
        .on_connection_start(&connection(None, 8443))
        .ok_or_else(|| anyhow!("port did not resolve"))?;
    hook.on_bytes_transferred(&context, Direction::Upload, 111);
    hook.on_connection_end(context);

    wait_until("batch to be dropped", || reporter.stats().dropped_batches == 1).await?;
    ensure!(
        harness.backend.usage_attempts() == 3,
        "expected 3 attempts, got {}",
        harness.backend.usage_attempts()
    );

    let context = hook
        .on_connection_start(&connection(Some("00112233445566778899aabbccddeeff"), 1))
        .ok_or_else(|| anyhow!("second credential did not resolve"))?;
    hook.on_bytes_transferred(&context, Direction::Download, 222);
    hook.on_connection_end(context);

    let backend = harness.backend.clone();
    wait_until("second report", || backend.accepted_reports() == 1).await?;
    let entries = harness.backend.reported_entries();
    ensure!(
        entries.len() == 1 && entries[0].user_id == "u2" && entries[0].d == 222,
        "dropped batch resurfaced: {:?}",
        entries
    );

    runtime.shutdown().await;
    Ok(())
}

/// A backend outage keeps the last directory; recovery replaces it whole.
pub async fn failed_resync_keeps_directory() -> Result<()> {
    let harness = Harness::start().await?;
    let runtime = MeterRuntime::start(&harness.config(API_KEY, 10)).await?;
    let directory = runtime
        .api_state()
        .directory
        .ok_or_else(|| anyhow!("runtime has no directory"))?;

    harness.backend.set_tenants_down(true);
    ensure!(directory.resync().await.is_err(), "resync should fail while backend is down");
    ensure!(
        directory.resolve_by_credential("abc123").as_deref() == Some("u1"),
        "previous directory was lost"
    );
    ensure!(
        directory.resolve_by_port(8443).as_deref() == Some("u1"),
        "previous port binding was lost"
    );

    harness.backend.set_tenants(vec![TenantDescriptor {
        id: "u3".to_string(),
        credential: "cafe".to_string(),
        port: Some(8443),
        speed_limit_mbps: Some(1),
    }]);
    harness.backend.set_tenants_down(false);
    let summary = directory.resync().await?;
    ensure!(summary.added == 1 && summary.removed == 2, "unexpected summary {:?}", summary);
    ensure!(directory.resolve_by_credential("abc123").is_none(), "stale credential survived");
    ensure!(directory.resolve_by_port(8443).as_deref() == Some("u3"), "port not rebound");

    runtime.shutdown().await;
    Ok(())
}

pub async fn wrong_api_key_leaves_directory_empty() -> Result<()> {
    let harness = Harness::start().await?;
    let runtime = MeterRuntime::start(&harness.config("wrong-key", 1)).await?;
    let hook = runtime.hook();

    ensure!(hook.is_metered(), "runtime should be in dynamic mode");
    ensure!(
        hook.on_connection_start(&connection(Some("abc123"), 8443)).is_none(),
        "connection resolved without a directory"
    );

    runtime.shutdown().await;
    ensure!(harness.backend.accepted_reports() == 0, "usage reached the backend");
    Ok(())
}

pub async fn shutdown_drains_pending_usage() -> Result<()> {
    let harness = Harness::start().await?;
    let runtime = MeterRuntime::start(&harness.config(API_KEY, 100)).await?;
    let hook = runtime.hook();

    for bytes in [10u64, 20, 30] {
        let context = hook
            .on_connection_start(&connection(Some("abc123"), 0))
            .ok_or_else(|| anyhow!("credential did not resolve"))?;
        hook.on_bytes_transferred(&context, Direction::Upload, bytes);
        hook.on_connection_end(context);
    }
    ensure!(harness.backend.accepted_reports() == 0, "batch flushed before threshold");

    runtime.shutdown().await;

    ensure!(
        harness.backend.accepted_reports() == 1,
        "expected one drain report, got {}",
        harness.backend.accepted_reports()
    );
    let uploaded: u64 = harness.backend.reported_entries().iter().map(|e| e.u).sum();
    ensure!(uploaded == 60, "expected 60 uploaded bytes, got {}", uploaded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn end_to_end_usage_is_reported() {
        end_to_end_usage().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_drop_the_batch() {
        retry_exhaustion_drops_batch().await.unwrap();
    }

    #[tokio::test]
    async fn backend_outage_keeps_previous_directory() {
        failed_resync_keeps_directory().await.unwrap();
    }

    #[tokio::test]
    async fn wrong_api_key_is_rejected() {
        wrong_api_key_leaves_directory_empty().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_delivers_partial_batch() {
        shutdown_drains_pending_usage().await.unwrap();
    }

    #[test]
    fn test_integration_results() {
        let mut results = IntegrationTestResults {
            total_tests: 0,
            passed: 0,
            failed: 0,
            test_details: Vec::new(),
        };

        results.add_test(TestResult {
            name: "Test 1".to_string(),
            passed: true,
            error: None,
            duration_ms: 100,
        });
        results.add_test(TestResult {
            name: "Test 2".to_string(),
            passed: false,
            error: Some("boom".to_string()),
            duration_ms: 5,
        });

        assert_eq!(results.total_tests, 2);
        assert_eq!(results.passed, 1);
        assert_eq!(results.failed, 1);
    }
}
