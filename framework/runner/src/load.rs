use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context};
use async_trait::async_trait;

use crate::types::TestbedResult;

const MIN_BATCH_PERIOD: Duration = Duration::from_micros(1);
const MAX_BATCH_PERIOD: Duration = Duration::from_secs(60 * 60);

/// How much load to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Total number of items to send per second, across all workers.
    pub data_items_per_second: u64,
    /// Number of items sent together in one write.
    pub items_per_batch: u64,
    /// Number of workers, each with its own connection.
    pub parallel: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            data_items_per_second: 1_000,
            items_per_batch: 10,
            parallel: 1,
        }
    }
}

impl LoadOptions {
    pub fn validate(&self) -> TestbedResult<()> {
        ensure!(
            self.data_items_per_second > 0,
            "Items per second must be greater than zero"
        );
        ensure!(
            self.items_per_batch > 0,
            "Items per batch must be greater than zero"
        );
        ensure!(self.parallel > 0, "Parallelism must be greater than zero");
        ensure!(
            self.batch_period_secs() <= MAX_BATCH_PERIOD.as_secs_f64(),
            "Sending one batch per connection takes more than {:?} at {} items per second",
            MAX_BATCH_PERIOD,
            self.data_items_per_second
        );
        Ok(())
    }

    /// How often each worker has to send a batch to reach the target rate.
    pub fn batch_period(&self) -> TestbedResult<Duration> {
        let period = Duration::try_from_secs_f64(self.batch_period_secs())
            .with_context(|| format!("Invalid batch period for {self:?}"))?;
        Ok(period.max(MIN_BATCH_PERIOD))
    }

    fn batch_period_secs(&self) -> f64 {
        (self.items_per_batch as f64 * self.parallel as f64) / self.data_items_per_second as f64
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        0.0
    } else {
        count as f64 / elapsed.as_secs_f64()
    }
}

/// Snapshot of a [LoadGenerator].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadStats {
    pub sent: u64,
    pub elapsed: Duration,
}

impl Display for LoadStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sent: {:10} items ({:.0}/sec)",
            self.sent,
            rate(self.sent, self.elapsed)
        )
    }
}

/// Snapshot of a [MockBackend].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackendStats {
    pub received: u64,
    pub elapsed: Duration,
}

impl Display for BackendStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Received: {:10} items ({:.0}/sec)",
            self.received,
            rate(self.received, self.elapsed)
        )
    }
}

/// Produces synthetic telemetry items and sends them into the agent.
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// The address load is sent to, if the transport is networked.
    ///
    /// The agent is considered started once this address accepts connections.
    fn endpoint(&self) -> Option<SocketAddr>;

    async fn start(&self, options: LoadOptions) -> TestbedResult<()>;

    /// Stop generating. Once this returns no more items are sent.
    async fn stop(&self);

    fn stats(&self) -> LoadStats;

    fn data_items_sent(&self) -> u64;
}

/// The final receiver of telemetry forwarded by the agent.
#[async_trait]
pub trait MockBackend: Send + Sync {
    /// Start receiving, writing the backend's own log to `log_file_path`.
    async fn start(&self, log_file_path: PathBuf) -> TestbedResult<()>;

    async fn stop(&self);

    fn stats(&self) -> BackendStats;

    fn data_items_received(&self) -> u64;

    /// Keep the received items in memory so that they can be inspected after the run.
    fn enable_recording(&self);
}
