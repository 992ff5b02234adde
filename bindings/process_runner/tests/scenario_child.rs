#![cfg(unix)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use testbed_process_runner::prelude::*;

struct IdleLoad;

#[async_trait]
impl LoadGenerator for IdleLoad {
    fn endpoint(&self) -> Option<SocketAddr> {
        None
    }

    async fn start(&self, _options: LoadOptions) -> TestbedResult<()> {
        Ok(())
    }

    async fn stop(&self) {}

    fn stats(&self) -> LoadStats {
        LoadStats::default()
    }

    fn data_items_sent(&self) -> u64 {
        0
    }
}

struct IdleBackend;

#[async_trait]
impl MockBackend for IdleBackend {
    async fn start(&self, log_file_path: PathBuf) -> TestbedResult<()> {
        std::fs::write(log_file_path, "")?;
        Ok(())
    }

    async fn stop(&self) {}

    fn stats(&self) -> BackendStats {
        BackendStats::default()
    }

    fn data_items_received(&self) -> u64 {
        0
    }

    fn enable_recording(&self) {}
}

fn builder(root: &std::path::Path, spec: ResourceSpec) -> ScenarioBuilder {
    Scenario::builder(
        "child_agent",
        Arc::new(IdleLoad),
        Arc::new(IdleBackend),
        Arc::new(ChildProcessRunner::new("/bin/sh")),
    )
    .with_duration(Duration::from_secs(2))
    .with_results_root(root)
    .with_resource_spec(spec)
    .no_progress()
}

#[test]
fn child_agent_runs_for_the_duration() {
    let root = tempfile::tempdir().unwrap();
    let mut scenario = builder(
        root.path(),
        ResourceSpec::default().with_check_period(Duration::from_millis(200)),
    )
    .build()
    .unwrap();

    scenario.start_backend().unwrap();
    scenario
        .start_agent(["-c", "echo agent up; exec sleep 30"])
        .unwrap();
    assert!(scenario.sleep(scenario.duration()));
    scenario.stop();

    assert_eq!(None, scenario.failure_cause());
    let log = std::fs::read_to_string(scenario.compose_result_file_name("agent.log")).unwrap();
    assert!(log.contains("agent up"));
}

#[test]
fn runaway_agent_fails_the_run() {
    let root = tempfile::tempdir().unwrap();
    let mut scenario = builder(
        root.path(),
        ResourceSpec::default()
            .with_max_ram(1)
            .with_check_period(Duration::from_millis(200)),
    )
    .with_duration(Duration::from_secs(30))
    .build()
    .unwrap();

    scenario.start_backend().unwrap();
    scenario.start_agent(["-c", "exec sleep 60"]).unwrap();

    let start = Instant::now();
    assert!(!scenario.sleep(scenario.duration()));
    assert!(start.elapsed() < Duration::from_secs(10));

    let cause = scenario.failure_cause().unwrap();
    assert!(cause.starts_with("Agent: RAM consumption is"), "{cause}");

    scenario.stop();
}

#[test]
fn missing_binary_fails_the_run() {
    let root = tempfile::tempdir().unwrap();
    let mut scenario = Scenario::builder(
        "missing_agent",
        Arc::new(IdleLoad),
        Arc::new(IdleBackend),
        Arc::new(ChildProcessRunner::new("/non/existent/otelcol")),
    )
    .with_duration(Duration::from_secs(2))
    .with_results_root(root.path())
    .no_progress()
    .build()
    .unwrap();

    scenario.start_agent(Vec::<String>::new()).unwrap();

    assert!(scenario.is_failed());
    assert!(scenario
        .failure_cause()
        .unwrap()
        .starts_with("Agent: Failed to start: Failed to spawn /non/existent/otelcol"));
}
