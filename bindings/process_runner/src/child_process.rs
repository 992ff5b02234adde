use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use testbed_runner::prelude::*;
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;

/// Environment variable that tells the child where to write a CPU profile.
pub const CPU_PROFILE_PATH_ENV: &str = "TESTBED_CPU_PROFILE_PATH";

/// How long a process gets to exit after being asked to terminate before it is killed.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningProcess {
    child: Child,
    pid: u32,
    name: String,
    resource_spec: ResourceSpec,
    stopped: ShutdownHandle,
}

/// Runs a binary as a child process and watches its resource consumption.
pub struct ChildProcessRunner {
    bin_path: PathBuf,
    config_flag: String,
    config_file: parking_lot::Mutex<Option<tempfile::NamedTempFile>>,
    process: tokio::sync::Mutex<Option<RunningProcess>>,
    consumption: Arc<parking_lot::Mutex<ResourceConsumption>>,
}

impl ChildProcessRunner {
    pub fn new(bin_path: impl Into<PathBuf>) -> Self {
        Self {
            bin_path: bin_path.into(),
            config_flag: "--config".to_string(),
            config_file: parking_lot::Mutex::new(None),
            process: tokio::sync::Mutex::new(None),
            consumption: Arc::new(parking_lot::Mutex::new(ResourceConsumption::default())),
        }
    }

    /// The flag used to pass the prepared config file, `--config` unless changed.
    pub fn with_config_flag(mut self, flag: impl Into<String>) -> Self {
        self.config_flag = flag.into();
        self
    }

    pub fn bin_path(&self) -> &Path {
        &self.bin_path
    }

    /// Write a rendered config to a temporary file that is passed to the process on start.
    ///
    /// The file is removed when the runner is dropped or another config is prepared.
    pub fn prepare_config(&self, contents: &str) -> TestbedResult<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix("testbed-config-")
            .suffix(".yaml")
            .tempfile()
            .context("Failed to create config file")?;
        file.write_all(contents.as_bytes())
            .context("Failed to write config file")?;
        file.flush()?;

        let path = file.path().to_path_buf();
        log::debug!("Prepared config for {} at {}", self.bin_path.display(), path.display());
        *self.config_file.lock() = Some(file);

        Ok(path)
    }

    fn build_command(&self, params: &StartParams) -> TestbedResult<Command> {
        let log_file = std::fs::File::create(&params.log_file_path).with_context(|| {
            format!("Failed to create log file {}", params.log_file_path.display())
        })?;
        let stderr = log_file.try_clone()?;

        let mut command = Command::new(&self.bin_path);
        if let Some(config) = self.config_file.lock().as_ref() {
            command.arg(&self.config_flag).arg(config.path());
        }
        command
            .args(&params.cmd_args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        if let Some(profile) = &params.cpu_profile_path {
            command.env(CPU_PROFILE_PATH_ENV, profile);
        }

        Ok(command)
    }
}

#[async_trait]
impl ProcessRunner for ChildProcessRunner {
    async fn start(&self, params: StartParams) -> TestbedResult<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            bail!("{} is already running", params.name);
        }

        let mut command = self.build_command(&params)?;
        log::debug!("Starting {}: {command:?}", params.name);
        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.bin_path.display()))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow!("{} exited before its pid could be read", params.name))?;

        log::info!("{} started with pid {pid}", params.name);
        *self.consumption.lock() = ResourceConsumption::new(&params.name);
        *process = Some(RunningProcess {
            child,
            pid,
            name: params.name,
            resource_spec: params.resource_spec.unwrap_or_default(),
            stopped: ShutdownHandle::new(),
        });

        Ok(())
    }

    async fn stop(&self) -> TestbedResult<ProcessExit> {
        let mut process = self
            .process
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("Process is not running"))?;
        process.stopped.shutdown();

        let status = terminate(&mut process).await?;
        log::debug!("{} exited with {status}", process.name);

        Ok(ProcessExit {
            exit_code: status.code(),
            consumption: self.resource_consumption(),
        })
    }

    async fn watch_resource_consumption(&self) -> TestbedResult<()> {
        let (mut stopped, spec, pid, name) = {
            let process = self.process.lock().await;
            let process = process
                .as_ref()
                .ok_or_else(|| anyhow!("Process is not running"))?;
            (
                process.stopped.new_listener(),
                process.resource_spec,
                process.pid,
                process.name.clone(),
            )
        };

        let mut monitor = ProcessMonitor::new(pid);
        let period = if spec.resource_check_period.is_zero() {
            DEFAULT_RESOURCE_CHECK_PERIOD
        } else {
            spec.resource_check_period
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped.wait_for_shutdown() => return Ok(()),
            }

            {
                let mut process = self.process.lock().await;
                let Some(process) = process.as_mut() else {
                    return Ok(());
                };
                if let Some(status) = process
                    .child
                    .try_wait()
                    .with_context(|| format!("Failed to check whether {name} is running"))?
                {
                    bail!("{name} exited unexpectedly with {status}");
                }
            }

            let Some(sample) = monitor.sample() else {
                bail!("{name} with pid {pid} is no longer running");
            };
            self.consumption.lock().record(&sample);

            if let Some(violation) = spec.check(&sample) {
                bail!("{violation} (pid {pid})");
            }
        }
    }

    fn resource_consumption(&self) -> ResourceConsumption {
        self.consumption.lock().clone()
    }
}

/// Ask the process to exit, killing it if it has not done so within [STOP_TIMEOUT].
async fn terminate(process: &mut RunningProcess) -> TestbedResult<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(process.pid as i32), Signal::SIGTERM) {
            // Already exited and reaped.
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("Failed to send SIGTERM to {}: {e}", process.name),
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = process.child.start_kill() {
            log::warn!("Failed to kill {}: {e}", process.name);
        }
    }

    match tokio::time::timeout(STOP_TIMEOUT, process.child.wait()).await {
        Ok(status) => {
            status.with_context(|| format!("Failed to wait for {} to exit", process.name))
        }
        Err(_) => {
            log::warn!(
                "{} did not exit within {STOP_TIMEOUT:?}, killing it",
                process.name
            );
            process
                .child
                .kill()
                .await
                .with_context(|| format!("Failed to kill {}", process.name))?;
            process
                .child
                .wait()
                .await
                .with_context(|| format!("Failed to wait for {} to exit", process.name))
        }
    }
}
