use std::path::Path;

use anyhow::Context;
use testbed_process_runner::prelude::TestbedResult;

use crate::cli::Cli;

/// Values substituted for `${NAME}` placeholders in config files.
pub struct TemplateVars(Vec<(&'static str, String)>);

impl TemplateVars {
    pub fn new(cli: &Cli, result_dir: &Path) -> Self {
        Self(vec![
            ("RECEIVER_PORT", cli.receiver_port.to_string()),
            ("BACKEND_PORT", cli.backend_port.to_string()),
            ("SCRAPER_PORT", cli.scraper_port.to_string()),
            ("AGENT_METRICS_PORT", cli.agent_metrics_port.to_string()),
            ("RESULT_DIR", result_dir.display().to_string()),
        ])
    }

    pub fn render(&self, template: &str) -> String {
        self.0.iter().fold(template.to_string(), |rendered, (name, value)| {
            rendered.replace(&format!("${{{name}}}"), value)
        })
    }

    pub fn render_file(&self, path: &Path) -> TestbedResult<String> {
        let template = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Ok(self.render(&template))
    }
}

/// Scraper config that pulls the agent's own metrics.
pub fn default_scraper_config(agent_metrics_port: u16) -> String {
    format!(
        r#"global:
  scrape_interval: 15s
  evaluation_interval: 15s

scrape_configs:
  - job_name: "agent"
    static_configs:
      - targets: ["localhost:{agent_metrics_port}"]
"#
    )
}
