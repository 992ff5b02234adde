use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::resource::{ResourceConsumption, ResourceSpec};
use crate::types::TestbedResult;

/// The part a managed process plays in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ProcessRole {
    /// The telemetry pipeline process under test.
    Agent,
    /// The process that pulls metrics from the agent.
    Scraper,
}

impl ProcessRole {
    /// Name of the file in the result directory that the process output is redirected to.
    pub fn log_file_name(&self) -> &'static str {
        match self {
            ProcessRole::Agent => "agent.log",
            ProcessRole::Scraper => "scraper.log",
        }
    }
}

/// Everything a [ProcessRunner] needs to start its process.
#[derive(Debug, Clone, PartialEq)]
pub struct StartParams {
    /// Display name used in logs and consumption snapshots.
    pub name: String,
    /// Standard output and standard error of the process are written here.
    pub log_file_path: PathBuf,
    /// Extra arguments, appended after any arguments the runner adds itself.
    pub cmd_args: Vec<String>,
    /// The ceilings to enforce while watching the process.
    pub resource_spec: Option<ResourceSpec>,
    /// Where the process should write a CPU profile, if it supports that.
    pub cpu_profile_path: Option<PathBuf>,
}

/// Returned by [ProcessRunner::stop] once the process has exited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessExit {
    /// The exit code, or [None] if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Consumption accumulated while the process was watched.
    pub consumption: ResourceConsumption,
}

impl Display for ProcessExit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit code {code}")?,
            None => write!(f, "terminated by signal")?,
        }
        write!(
            f,
            ", peak RAM {} MiB, peak CPU {:.1}%",
            self.consumption.ram_mib_max, self.consumption.cpu_percent_max
        )
    }
}

/// The capability set of a managed process.
///
/// The scenario drives agents and scrapers through this trait alone.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Spawn the process with its output redirected to [StartParams::log_file_path].
    async fn start(&self, params: StartParams) -> TestbedResult<()>;

    /// Terminate the process and wait for it to exit.
    async fn stop(&self) -> TestbedResult<ProcessExit>;

    /// Periodically sample the process until it is stopped.
    ///
    /// Returns `Ok(())` once [ProcessRunner::stop] has been called, or an error as soon as the
    /// process exceeds its [ResourceSpec] or exits on its own.
    async fn watch_resource_consumption(&self) -> TestbedResult<()>;

    /// The consumption recorded so far.
    fn resource_consumption(&self) -> ResourceConsumption;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    /// The process misbehaved while running. It still has to be stopped.
    Failed,
    Stopped,
}

/// A [ProcessRunner] taking part in a scenario, together with its lifecycle state.
pub(crate) struct Participant {
    pub(crate) role: ProcessRole,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    /// Address to probe for readiness after the process has been started.
    pub(crate) endpoint: Option<SocketAddr>,
    state: Mutex<ProcessState>,
}

impl Participant {
    pub(crate) fn new(
        role: ProcessRole,
        runner: Arc<dyn ProcessRunner>,
        endpoint: Option<SocketAddr>,
    ) -> Self {
        Self {
            role,
            runner,
            endpoint,
            state: Mutex::new(ProcessState::NotStarted),
        }
    }

    pub(crate) fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    /// Move from running to failed. Returns `false` if the process was not running, for example
    /// because it has already been stopped.
    pub(crate) fn mark_failed(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ProcessState::Running {
            *state = ProcessState::Failed;
            true
        } else {
            false
        }
    }

    /// Whether the process may still be alive and so needs stopping.
    pub(crate) fn needs_stop(&self) -> bool {
        matches!(self.state(), ProcessState::Running | ProcessState::Failed)
    }
}
