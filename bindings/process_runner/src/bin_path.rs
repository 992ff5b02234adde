use anyhow::bail;
use anyhow::Context;
use std::env;
use std::path::PathBuf;
use testbed_runner::prelude::TestbedResult;

/// Environment variable to override the path to the agent binary.
pub const AGENT_PATH_ENV: &str = "TESTBED_AGENT_PATH";

/// Environment variable to override the path to the scraper binary.
pub const SCRAPER_PATH_ENV: &str = "TESTBED_SCRAPER_PATH";

/// Get the path to a binary.
///
/// If `env_var` is set, its value is used as the path to the binary. If it is not set, or set to
/// `default_name` itself, the binary is looked up in the system's `PATH`.
pub fn resolve_binary(env_var: &str, default_name: &str) -> TestbedResult<PathBuf> {
    match env::var(env_var).ok().as_deref() {
        Some("") => {
            bail!("'{env_var}' set to empty string");
        }
        Some(name) if name == default_name => find_in_path(env_var, default_name),
        None => find_in_path(env_var, default_name),
        Some(path) => {
            let bin_path = PathBuf::from(path);
            if !bin_path.exists() {
                bail!(
                    "Path to {default_name} binary overwritten with '{env_var}={path}' but that path doesn't exist",
                    path = bin_path.display()
                );
            }
            Ok(bin_path)
        }
    }
}

fn find_in_path(env_var: &str, default_name: &str) -> TestbedResult<PathBuf> {
    log::debug!("'{env_var}' is not a path so looking for '{default_name}' in user's 'PATH'");
    which::which(default_name).with_context(|| {
        format!(
            "{default_name} binary not found in PATH. Please install it or set '{env_var}' to the correct path."
        )
    })
}
