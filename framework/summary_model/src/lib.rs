use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

/// File name of the summary inside a scenario's result directory.
pub const SUMMARY_FILE_NAME: &str = "summary.json";

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("I/O error while accessing run summary: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid run summary: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type SummaryResult<T> = Result<T, SummaryError>;

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The duration that the run was configured with, in milliseconds
    pub run_duration_ms: u64,
    /// Data items the load generator reported as sent
    pub items_sent: u64,
    /// Data items the mock backend reported as received
    pub items_received: u64,
    /// The first failure recorded during the run, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,
    /// Consumption of every process that was started
    #[serde(default)]
    pub processes: Vec<ProcessSummary>,
    /// Environment variables set for the run
    ///
    /// Only the ones the runner is aware of.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// The version of the testbed runner that produced this summary
    pub testbed_version: String,
}

/// Sampled consumption of one managed process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSummary {
    pub name: String,
    pub cpu_percent_avg: f64,
    pub cpu_percent_max: f64,
    pub ram_mib_avg: u64,
    pub ram_mib_max: u64,
}

impl RunSummary {
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        run_duration_ms: u64,
        testbed_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            run_duration_ms,
            items_sent: 0,
            items_received: 0,
            failure_cause: None,
            processes: Vec::new(),
            env: HashMap::with_capacity(0),
            testbed_version,
        }
    }

    pub fn set_item_counts(&mut self, sent: u64, received: u64) {
        self.items_sent = sent;
        self.items_received = received;
    }

    pub fn set_failure_cause(&mut self, cause: Option<String>) {
        self.failure_cause = cause;
    }

    pub fn add_process(&mut self, process: ProcessSummary) {
        self.processes.push(process);
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Whether every item that was sent has been received and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failure_cause.is_none() && self.items_sent == self.items_received
    }
}

/// Serialize the run summary to a writer as pretty-printed JSON
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> SummaryResult<()> {
    serde_json::to_writer_pretty(writer, run_summary)?;
    Ok(())
}

/// Write the run summary to `path`, replacing any existing file
pub fn write_run_summary(run_summary: &RunSummary, path: &Path) -> SummaryResult<()> {
    let mut file = std::fs::File::create(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> SummaryResult<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    Ok(serde_json::from_reader(reader)?)
}

/// Load a run summary from a file written by [write_run_summary]
pub fn read_run_summary(path: &Path) -> SummaryResult<RunSummary> {
    load_run_summary(std::fs::File::open(path)?)
}
