use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::config::DEFAULT_RESULTS_ROOT;
use crate::scenario::ScenarioBuilder;

/// Options shared by every scenario driver. Flatten into the driver's own CLI.
#[derive(Args, Debug, Clone)]
pub struct TestbedScenarioCli {
    /// How long to generate load for, for example `30s` or `2m`.
    ///
    /// Takes precedence over the `TEST_DURATION` environment variable.
    #[clap(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Do not show a progress bar on the CLI.
    ///
    /// Recommended for CI where nobody watches the progress bar and it only adds noise to the
    /// logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Do not write `summary.json` to the result directory.
    #[clap(long, default_value = "false")]
    pub skip_results: bool,

    /// Directory that per-scenario result directories are created in.
    #[clap(long, default_value = DEFAULT_RESULTS_ROOT)]
    pub results_dir: PathBuf,
}

impl TestbedScenarioCli {
    pub fn apply(&self, mut builder: ScenarioBuilder) -> ScenarioBuilder {
        if let Some(duration) = self.duration {
            builder = builder.with_duration(duration);
        }
        if self.no_progress {
            builder = builder.no_progress();
        }
        if self.skip_results {
            builder = builder.skip_results();
        }

        builder.with_results_root(self.results_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        testbed: TestbedScenarioCli,
    }

    #[test]
    fn defaults() {
        let cli = TestCli::parse_from(["driver"]);

        assert_eq!(None, cli.testbed.duration);
        assert!(!cli.testbed.no_progress);
        assert!(!cli.testbed.skip_results);
        assert_eq!(PathBuf::from("results"), cli.testbed.results_dir);
    }

    #[test]
    fn duration_is_parsed() {
        let cli = TestCli::parse_from(["driver", "--duration", "90s", "--skip-results"]);

        assert_eq!(Some(Duration::from_secs(90)), cli.testbed.duration);
        assert!(cli.testbed.skip_results);
    }

    #[test]
    fn invalid_duration_is_rejected() {
        assert!(TestCli::try_parse_from(["driver", "--duration", "soon"]).is_err());
    }
}
