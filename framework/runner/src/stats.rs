use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use testbed_core::prelude::DelegatedShutdownListener;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::executor::Executor;
use crate::load::{LoadGenerator, MockBackend};
use crate::process::{Participant, ProcessState};

/// Everything the periodic stats line is built from.
#[derive(Clone)]
pub(crate) struct StatsSources {
    pub(crate) run_name: String,
    pub(crate) participants: Vec<Arc<Participant>>,
    pub(crate) load: Arc<dyn LoadGenerator>,
    pub(crate) backend: Arc<dyn MockBackend>,
}

impl StatsSources {
    pub(crate) fn snapshot(&self) -> String {
        self.participants
            .iter()
            .filter(|p| p.state() == ProcessState::Running)
            .map(|p| p.runner.resource_consumption().to_string())
            .chain([
                self.load.stats().to_string(),
                self.backend.stats().to_string(),
            ])
            .join(" | ")
    }
}

/// Log a stats line every `period` until `done` fires.
///
/// The first line is logged one period after the start, not immediately.
pub(crate) fn start_stats_sampler(
    executor: &Executor,
    period: Duration,
    sources: StatsSources,
    done: DelegatedShutdownListener,
) -> JoinHandle<()> {
    executor.spawn(run_stats_sampler(period, sources, done))
}

async fn run_stats_sampler(
    period: Duration,
    sources: StatsSources,
    mut done: DelegatedShutdownListener,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log::info!("[{}] {}", sources.run_name, sources.snapshot());
            }
            _ = done.wait_for_shutdown() => {
                log::trace!("Stats sampler for {} stopped", sources.run_name);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use testbed_core::prelude::ShutdownHandle;

    use crate::load::{BackendStats, LoadOptions, LoadStats};
    use crate::resource::ResourceSpec;
    use crate::types::TestbedResult;

    use super::*;

    /// Counts how often the sampler asks for its stats.
    #[derive(Default)]
    struct CountingLoad {
        snapshots: AtomicU64,
    }

    #[async_trait]
    impl LoadGenerator for CountingLoad {
        fn endpoint(&self) -> Option<std::net::SocketAddr> {
            None
        }

        async fn start(&self, _options: LoadOptions) -> TestbedResult<()> {
            Ok(())
        }

        async fn stop(&self) {}

        fn stats(&self) -> LoadStats {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
            LoadStats::default()
        }

        fn data_items_sent(&self) -> u64 {
            0
        }
    }

    struct IdleBackend;

    #[async_trait]
    impl MockBackend for IdleBackend {
        async fn start(&self, _log_file_path: PathBuf) -> TestbedResult<()> {
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

    #[tokio::test(start_paused = true)]
    async fn sampler_ticks_at_clamped_period_until_done() {
        let period = ResourceSpec::default()
            .clamped_to(Duration::from_secs(2))
            .resource_check_period;
        assert_eq!(Duration::from_secs(2), period);

        let load = Arc::new(CountingLoad::default());
        let sources = StatsSources {
            run_name: "sampler".to_string(),
            participants: Vec::new(),
            load: load.clone(),
            backend: Arc::new(IdleBackend),
        };
        let done = ShutdownHandle::new();
        let sampler = tokio::spawn(run_stats_sampler(period, sources, done.new_listener()));

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(0, load.snapshots.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(4_200)).await;
        assert_eq!(3, load.snapshots.load(Ordering::SeqCst));

        done.shutdown();
        tokio::time::timeout(Duration::from_secs(1), sampler)
            .await
            .expect("sampler did not stop")
            .unwrap();
        assert_eq!(3, load.snapshots.load(Ordering::SeqCst));
    }
}
