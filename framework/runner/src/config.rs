use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};

use crate::types::TestbedResult;

pub const TEST_DURATION_ENV: &str = "TEST_DURATION";
pub const DEFAULT_RUN_DURATION: Duration = Duration::from_secs(15);
pub const DEFAULT_RESULTS_ROOT: &str = "results";

/// The run duration from `TEST_DURATION`, or [DEFAULT_RUN_DURATION] if it is unset or empty.
pub fn run_duration() -> TestbedResult<Duration> {
    match std::env::var(TEST_DURATION_ENV) {
        Ok(value) if !value.trim().is_empty() => parse_run_duration(&value)
            .with_context(|| {
                format!("Invalid {TEST_DURATION_ENV}: {value}. Expecting a valid duration string.")
            }),
        _ => Ok(DEFAULT_RUN_DURATION),
    }
}

/// Parse a duration string such as `15s`, `2m` or `1h 30m`.
pub fn parse_run_duration(value: &str) -> TestbedResult<Duration> {
    let duration = humantime::parse_duration(value.trim())?;
    if duration.is_zero() {
        bail!("Run duration must be greater than zero");
    }

    Ok(duration)
}

/// Create `<root>/<scenario name>` and return its absolute path.
pub(crate) fn prepare_result_dir(root: &Path, scenario_name: &str) -> TestbedResult<PathBuf> {
    let dir = root.join(scenario_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create result directory {}", dir.display()))?;

    dir.canonicalize()
        .with_context(|| format!("Failed to resolve result directory {}", dir.display()))
}
