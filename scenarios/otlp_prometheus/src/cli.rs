use std::path::PathBuf;

use clap::Parser;
use testbed_process_runner::prelude::TestbedScenarioCli;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
pub struct Cli {
    /// Path to the agent binary.
    ///
    /// Defaults to `TESTBED_AGENT_PATH`, or `otelcol` on the `PATH` if that is not set.
    #[clap(long)]
    pub agent_bin: Option<PathBuf>,

    /// Agent config file.
    ///
    /// The placeholders `${RECEIVER_PORT}`, `${BACKEND_PORT}`, `${SCRAPER_PORT}`,
    /// `${AGENT_METRICS_PORT}` and `${RESULT_DIR}` are replaced before the file is passed to the
    /// agent with `--config`.
    #[clap(long)]
    pub agent_config: PathBuf,

    /// Path to the scraper binary.
    ///
    /// Defaults to `TESTBED_SCRAPER_PATH`, or `prometheus` on the `PATH` if that is not set.
    #[clap(long)]
    pub scraper_bin: Option<PathBuf>,

    /// Scraper config file, rendered like the agent config and passed with `--config.file`.
    ///
    /// Without this the scraper pulls the agent's own metrics endpoint every 15 seconds.
    #[clap(long)]
    pub scraper_config: Option<PathBuf>,

    /// Run without a scraper.
    #[clap(long, default_value = "false")]
    pub no_scraper: bool,

    /// The port the scraper serves its API on.
    #[clap(long, default_value_t = 8080)]
    pub scraper_port: u16,

    /// The port the agent serves its own metrics on.
    #[clap(long, default_value_t = 8888)]
    pub agent_metrics_port: u16,

    /// The port the agent receives load on.
    #[clap(long, default_value_t = 34687)]
    pub receiver_port: u16,

    /// The port the mock backend listens on.
    #[clap(long, default_value_t = 34688)]
    pub backend_port: u16,

    #[clap(long, default_value_t = 10_000)]
    pub items_per_second: u64,

    #[clap(long, default_value_t = 100)]
    pub items_per_batch: u64,

    /// Number of connections to send load over.
    #[clap(long, default_value_t = 1)]
    pub parallel: usize,

    /// Maximum expected CPU usage of each process, in percent of one core. Zero disables the check.
    #[clap(long, default_value_t = 1200.0)]
    pub max_cpu: f64,

    /// Maximum expected resident memory of each process, in MiB. Zero disables the check.
    #[clap(long, default_value_t = 5500)]
    pub max_ram_mib: u64,

    #[command(flatten)]
    pub testbed: TestbedScenarioCli,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let cli = Cli::parse_from(["otlp_prometheus", "--agent-config", "agent.yaml"]);

        assert_eq!(34687, cli.receiver_port);
        assert_eq!(34688, cli.backend_port);
        assert_eq!(8080, cli.scraper_port);
        assert_eq!(10_000, cli.items_per_second);
        assert_eq!(100, cli.items_per_batch);
        assert_eq!(1, cli.parallel);
        assert!(!cli.no_scraper);
        assert!(cli.testbed.duration.is_none());
    }

    #[test]
    fn agent_config_is_required() {
        assert!(Cli::try_parse_from(["otlp_prometheus"]).is_err());
    }
}
