mod cli;
mod config;
mod executor;
mod init;
mod load;
mod monitor;
mod poll;
mod process;
mod progress;
mod readiness;
mod resource;
mod scenario;
mod shutdown;
mod stats;
mod types;

pub mod prelude {
    pub use crate::cli::TestbedScenarioCli;
    pub use crate::config::{
        parse_run_duration, run_duration, DEFAULT_RESULTS_ROOT, DEFAULT_RUN_DURATION,
        TEST_DURATION_ENV,
    };
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::load::{BackendStats, LoadGenerator, LoadOptions, LoadStats, MockBackend};
    pub use crate::monitor::ProcessMonitor;
    pub use crate::poll::{wait_for, Backoff, INITIAL_BACKOFF, MAX_BACKOFF};
    pub use crate::process::{ProcessExit, ProcessRole, ProcessRunner, ProcessState, StartParams};
    pub use crate::readiness::{is_reachable, READINESS_TIMEOUT};
    pub use crate::resource::{
        RamAmount, ResourceConsumption, ResourceSample, ResourceSpec, ResourceViolation,
        DEFAULT_RESOURCE_CHECK_PERIOD,
    };
    pub use crate::scenario::{Scenario, ScenarioBuilder, BACKEND_LOG_FILE, CPU_PROFILE_FILE};
    pub use crate::types::TestbedResult;

    pub use testbed_core::prelude::*;
    pub use testbed_summary_model::SUMMARY_FILE_NAME;

    pub use async_trait::async_trait;
}
