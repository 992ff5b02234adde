use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use chrono::{DateTime, Utc};
use testbed_core::prelude::{FailureSignal, ShutdownHandle};
use testbed_summary_model::{write_run_summary, ProcessSummary, RunSummary, SUMMARY_FILE_NAME};
use tokio::task::JoinHandle;

use crate::config::{prepare_result_dir, run_duration, DEFAULT_RESULTS_ROOT, TEST_DURATION_ENV};
use crate::executor::Executor;
use crate::load::{LoadGenerator, LoadOptions, MockBackend};
use crate::poll::wait_for;
use crate::process::{Participant, ProcessRole, ProcessRunner, ProcessState, StartParams};
use crate::progress::start_progress;
use crate::readiness::{describe, is_reachable, READINESS_TIMEOUT};
use crate::resource::ResourceSpec;
use crate::shutdown::start_interrupt_listener;
use crate::stats::{start_stats_sampler, StatsSources};
use crate::types::TestbedResult;

/// Log file of the mock backend inside the result directory.
pub const BACKEND_LOG_FILE: &str = "backend.log";
/// CPU profile path handed to the agent when profiling is enabled.
pub const CPU_PROFILE_FILE: &str = "cpu.prof";

/// Configures and creates a [Scenario].
pub struct ScenarioBuilder {
    name: String,
    load: Arc<dyn LoadGenerator>,
    backend: Arc<dyn MockBackend>,
    agent: Arc<dyn ProcessRunner>,
    scraper: Option<(Arc<dyn ProcessRunner>, Option<SocketAddr>)>,
    duration: Option<Duration>,
    results_root: PathBuf,
    resource_spec: ResourceSpec,
    skip_results: bool,
    no_progress: bool,
    cpu_profile: bool,
}

impl ScenarioBuilder {
    pub fn new(
        name: impl Into<String>,
        load: Arc<dyn LoadGenerator>,
        backend: Arc<dyn MockBackend>,
        agent: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            name: name.into(),
            load,
            backend,
            agent,
            scraper: None,
            duration: None,
            results_root: PathBuf::from(DEFAULT_RESULTS_ROOT),
            resource_spec: ResourceSpec::default(),
            skip_results: false,
            no_progress: false,
            cpu_profile: false,
        }
    }

    /// Add a scraper to the run. If `endpoint` is given the scraper is only considered started
    /// once it accepts connections there.
    pub fn with_scraper(
        mut self,
        runner: Arc<dyn ProcessRunner>,
        endpoint: Option<SocketAddr>,
    ) -> Self {
        self.scraper = Some((runner, endpoint));
        self
    }

    /// Override the run duration. Without this the duration comes from `TEST_DURATION`.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_results_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.results_root = root.into();
        self
    }

    pub fn with_resource_spec(mut self, spec: ResourceSpec) -> Self {
        self.resource_spec = spec;
        self
    }

    pub fn skip_results(mut self) -> Self {
        self.skip_results = true;
        self
    }

    pub fn no_progress(mut self) -> Self {
        self.no_progress = true;
        self
    }

    /// Ask the agent to write a CPU profile into the result directory.
    pub fn with_cpu_profile(mut self) -> Self {
        self.cpu_profile = true;
        self
    }

    /// Create the result directory, start the background tasks and return the scenario.
    pub fn build(self) -> TestbedResult<Scenario> {
        ensure!(!self.name.trim().is_empty(), "Scenario name must not be empty");

        let duration = match self.duration {
            Some(duration) => {
                ensure!(!duration.is_zero(), "Run duration must be greater than zero");
                duration
            }
            None => run_duration()?,
        };

        let result_dir = prepare_result_dir(&self.results_root, &self.name)?;
        let resource_spec = self.resource_spec.clamped_to(duration);
        let executor = Executor::new()?;
        let failure = FailureSignal::new(&self.name);
        let done = ShutdownHandle::new();

        let agent = Arc::new(Participant::new(
            ProcessRole::Agent,
            self.agent,
            self.load.endpoint(),
        ));
        let scraper = self.scraper.map(|(runner, endpoint)| {
            Arc::new(Participant::new(ProcessRole::Scraper, runner, endpoint))
        });

        let stats = StatsSources {
            run_name: self.name.clone(),
            participants: std::iter::once(agent.clone())
                .chain(scraper.clone())
                .collect(),
            load: self.load.clone(),
            backend: self.backend.clone(),
        };
        let sampler = start_stats_sampler(
            &executor,
            resource_spec.resource_check_period,
            stats.clone(),
            done.new_listener(),
        );
        start_interrupt_listener(&executor, failure.clone());

        let run_id = nanoid::nanoid!();
        log::info!(
            "[{}] Starting run {run_id} for {}, results in {}",
            self.name,
            humantime::format_duration(duration),
            result_dir.display()
        );

        Ok(Scenario {
            cpu_profile_path: self.cpu_profile.then(|| result_dir.join(CPU_PROFILE_FILE)),
            name: self.name,
            run_id,
            started_at: Utc::now(),
            result_dir,
            duration,
            resource_spec,
            skip_results: self.skip_results,
            no_progress: self.no_progress,
            load: self.load,
            backend: self.backend,
            agent,
            scraper,
            load_started: false,
            backend_started: false,
            failure,
            done,
            stats,
            sampler: Some(sampler),
            watchers: Vec::new(),
            stopped: false,
            executor,
        })
    }
}

/// One benchmark run: a load generator feeding an agent that forwards to a mock backend,
/// optionally with a scraper pulling metrics from the agent.
///
/// The driver calls the `start_*` operations in order, waits for the run to complete and then
/// calls [Scenario::stop]. Any failure in a component fires the run's failure signal, which
/// releases every wait early. Dropping a scenario that was not stopped stops it.
///
/// A scenario owns its async runtime, so it must not be created or dropped inside async code.
pub struct Scenario {
    name: String,
    run_id: String,
    started_at: DateTime<Utc>,
    result_dir: PathBuf,
    duration: Duration,
    resource_spec: ResourceSpec,
    skip_results: bool,
    no_progress: bool,
    cpu_profile_path: Option<PathBuf>,
    load: Arc<dyn LoadGenerator>,
    backend: Arc<dyn MockBackend>,
    agent: Arc<Participant>,
    scraper: Option<Arc<Participant>>,
    load_started: bool,
    backend_started: bool,
    failure: FailureSignal,
    done: ShutdownHandle,
    stats: StatsSources,
    sampler: Option<JoinHandle<()>>,
    watchers: Vec<JoinHandle<()>>,
    stopped: bool,
    executor: Executor,
}

impl Scenario {
    pub fn builder(
        name: impl Into<String>,
        load: Arc<dyn LoadGenerator>,
        backend: Arc<dyn MockBackend>,
        agent: Arc<dyn ProcessRunner>,
    ) -> ScenarioBuilder {
        ScenarioBuilder::new(name, load, backend, agent)
    }

    /// Start the mock backend, logging to `backend.log` in the result directory.
    ///
    /// Nothing can be measured without a backend, so a failure here is returned as well as
    /// recorded.
    pub fn start_backend(&mut self) -> TestbedResult<()> {
        let log_file = self.result_dir.join(BACKEND_LOG_FILE);
        log::info!("[{}] Starting mock backend", self.name);

        if let Err(e) = self.executor.execute_in_place(self.backend.start(log_file)) {
            self.failure.fire("Backend", format!("Failed to start: {e:#}"));
            return Err(e.context("Failed to start mock backend"));
        }

        self.backend_started = true;
        Ok(())
    }

    /// Start the agent and wait until it accepts load.
    pub fn start_agent<I, S>(&mut self, args: I) -> TestbedResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agent = self.agent.clone();
        self.start_process(&agent, args.into_iter().map(Into::into).collect())
    }

    /// Start the configured scraper and wait for its endpoint, if it has one.
    pub fn start_scraper<I, S>(&mut self, args: I) -> TestbedResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(scraper) = self.scraper.clone() else {
            bail!("No scraper configured for scenario {}", self.name);
        };
        self.start_process(&scraper, args.into_iter().map(Into::into).collect())
    }

    fn start_process(
        &mut self,
        participant: &Arc<Participant>,
        args: Vec<String>,
    ) -> TestbedResult<()> {
        let role = participant.role;
        if participant.state() != ProcessState::NotStarted {
            bail!("{role} has already been started");
        }

        let params = StartParams {
            name: role.to_string(),
            log_file_path: self.result_dir.join(role.log_file_name()),
            cmd_args: args,
            resource_spec: Some(self.resource_spec),
            cpu_profile_path: match role {
                ProcessRole::Agent => self.cpu_profile_path.clone(),
                ProcessRole::Scraper => None,
            },
        };

        log::info!("[{}] Starting {role}", self.name);
        if let Err(e) = self.executor.execute_in_place(participant.runner.start(params)) {
            self.failure.fire(&role.to_string(), format!("Failed to start: {e:#}"));
            return Ok(());
        }
        participant.set_state(ProcessState::Running);

        let watched = participant.clone();
        let failure = self.failure.clone();
        self.watchers.push(self.executor.spawn(async move {
            match watched.runner.watch_resource_consumption().await {
                Ok(()) => log::debug!("Stopped watching {}", watched.role),
                Err(e) => {
                    if watched.mark_failed() {
                        failure.fire(&watched.role.to_string(), format!("{e:#}"));
                    } else {
                        log::debug!("Ignoring watcher error for stopped {}: {e:#}", watched.role);
                    }
                }
            }
        }));

        if let Some(endpoint) = participant.endpoint {
            self.wait_for_n(|| is_reachable(endpoint), READINESS_TIMEOUT, describe(endpoint))?;
        }

        Ok(())
    }

    /// Start generating load into the agent.
    ///
    /// Invalid options are returned as an error. A failure of the generator itself fails the run.
    pub fn start_load(&mut self, options: LoadOptions) -> TestbedResult<()> {
        options.validate()?;

        log::info!(
            "[{}] Starting load: {} items/sec, {} items per batch, {} in parallel",
            self.name,
            options.data_items_per_second,
            options.items_per_batch,
            options.parallel
        );
        match self.executor.execute_in_place(self.load.start(options)) {
            Ok(()) => self.load_started = true,
            Err(e) => {
                self.failure.fire("Load generator", format!("Failed to start: {e:#}"));
            }
        }

        Ok(())
    }

    /// Block for `duration` or until the run fails, whichever is first.
    ///
    /// Returns `false` if the sleep was cut short by a failure.
    pub fn sleep(&self, duration: Duration) -> bool {
        let progress = if self.no_progress {
            None
        } else {
            start_progress(duration, self.failure.new_listener())
                .inspect_err(|e| log::warn!("Failed to show progress: {e}"))
                .ok()
        };

        let completed = self
            .executor
            .execute_until_signalled(
                async move { tokio::time::sleep(duration).await },
                self.failure.new_listener(),
            )
            .is_some();

        if let Some(progress) = progress {
            let _ = progress.join();
        }

        if !completed {
            log::warn!("[{}] Sleep interrupted by run failure", self.name);
        }
        completed
    }

    /// Poll `condition` until it holds.
    ///
    /// Returns `Ok(true)` once it holds and `Ok(false)` if the run has failed. A timeout is fatal:
    /// it fails the run and is returned as a [ConditionTimeoutError].
    ///
    /// [ConditionTimeoutError]: testbed_core::prelude::ConditionTimeoutError
    pub fn wait_for_n<F>(
        &self,
        condition: F,
        timeout: Duration,
        description: impl Display,
    ) -> TestbedResult<bool>
    where
        F: FnMut() -> bool,
    {
        let mut listener = self.failure.new_listener();
        match self
            .executor
            .execute_in_place(wait_for(condition, timeout, description, &mut listener))
        {
            Ok(met) => Ok(met),
            Err(e) => {
                self.failure.fire("Condition poller", &e);
                Err(e.into())
            }
        }
    }

    pub fn stop_load(&mut self) {
        if !self.load_started {
            log::debug!("[{}] Load generator not running, skipping stop", self.name);
            return;
        }
        self.load_started = false;

        self.executor.execute_in_place(self.load.stop());
        log::info!("[{}] Load generator stopped. {}", self.name, self.load.stats());
    }

    pub fn stop_agent(&mut self) {
        self.stop_process(&self.agent);
    }

    pub fn stop_backend(&mut self) {
        if !self.backend_started {
            log::debug!("[{}] Mock backend not running, skipping stop", self.name);
            return;
        }
        self.backend_started = false;

        self.executor.execute_in_place(self.backend.stop());
        log::info!("[{}] Mock backend stopped. {}", self.name, self.backend.stats());
    }

    pub fn stop_scraper(&mut self) {
        if let Some(scraper) = &self.scraper {
            self.stop_process(scraper);
        }
    }

    fn stop_process(&self, participant: &Participant) {
        let role = participant.role;
        if !participant.needs_stop() {
            log::debug!("[{}] {role} not running, skipping stop", self.name);
            return;
        }
        // Set before stopping so that the watcher does not report the exit as a failure.
        participant.set_state(ProcessState::Stopped);

        match self.executor.execute_in_place(participant.runner.stop()) {
            Ok(exit) => log::info!("[{}] {role} stopped: {exit}", self.name),
            Err(e) => {
                self.failure.fire(&role.to_string(), format!("Failed to stop: {e:#}"));
            }
        }
    }

    /// Tear the run down: stop the stats sampler, then the load generator, the agent, the
    /// backend and the scraper, in that order, and write the run summary.
    ///
    /// Every step runs even if an earlier one failed. Calling this again does nothing.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        log::info!("[{}] Stopping run {}", self.name, self.run_id);

        self.done.shutdown();
        if let Some(sampler) = self.sampler.take() {
            if let Err(e) = self.executor.execute_in_place(sampler) {
                log::warn!("[{}] Stats sampler did not finish cleanly: {e}", self.name);
            }
        }

        self.stop_load();
        self.stop_agent();
        self.stop_backend();
        self.stop_scraper();

        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }

        if !self.skip_results {
            match self.write_summary() {
                Ok(path) => log::info!(
                    "[{}] Run summary written to {}",
                    self.name,
                    path.display()
                ),
                Err(e) => log::error!("[{}] Failed to write run summary: {e:#}", self.name),
            }
        }

        match self.failure.cause() {
            Some(cause) => log::error!("[{}] Run failed: {cause}", self.name),
            None => log::info!("[{}] Run complete", self.name),
        }
    }

    fn write_summary(&self) -> TestbedResult<PathBuf> {
        let mut summary = RunSummary::new(
            self.run_id.clone(),
            self.name.clone(),
            self.started_at.timestamp(),
            self.duration.as_millis() as u64,
            env!("CARGO_PKG_VERSION").to_string(),
        );
        summary.set_item_counts(self.load.data_items_sent(), self.backend.data_items_received());
        summary.set_failure_cause(self.failure.cause());

        for participant in self.stats.participants.iter() {
            if participant.state() == ProcessState::NotStarted {
                continue;
            }
            let consumption = participant.runner.resource_consumption();
            summary.add_process(ProcessSummary {
                name: participant.role.to_string(),
                cpu_percent_avg: consumption.cpu_percent_avg(),
                cpu_percent_max: consumption.cpu_percent_max,
                ram_mib_avg: consumption.ram_mib_avg(),
                ram_mib_max: consumption.ram_mib_max,
            });
        }

        if let Ok(value) = std::env::var(TEST_DURATION_ENV) {
            summary.add_env(TEST_DURATION_ENV.to_string(), value);
        }

        let path = self.result_dir.join(SUMMARY_FILE_NAME);
        write_run_summary(&summary, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Path of a file called `name` inside the result directory.
    pub fn compose_result_file_name(&self, name: &str) -> PathBuf {
        self.result_dir.join(name)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The resource expectations, with the check period clamped to the run duration.
    pub fn resource_spec(&self) -> &ResourceSpec {
        &self.resource_spec
    }

    pub fn cpu_profile_path(&self) -> Option<&Path> {
        self.cpu_profile_path.as_deref()
    }

    pub fn load_generator(&self) -> &Arc<dyn LoadGenerator> {
        &self.load
    }

    pub fn mock_backend(&self) -> &Arc<dyn MockBackend> {
        &self.backend
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_fired()
    }

    /// The first failure recorded in this run.
    pub fn failure_cause(&self) -> Option<String> {
        self.failure.cause()
    }

    /// The line the stats sampler logs: running processes, then load and backend stats.
    pub fn stats_snapshot(&self) -> String {
        self.stats.snapshot()
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        self.stop();
    }
}
