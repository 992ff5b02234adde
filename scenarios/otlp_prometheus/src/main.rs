mod cli;
mod config;

use std::sync::Arc;
use std::time::Duration;

use testbed_load::prelude::*;
use testbed_process_runner::prelude::{
    resolve_binary, ChildProcessRunner, AGENT_PATH_ENV, SCRAPER_PATH_ENV,
};

use crate::cli::Cli;
use crate::config::{default_scraper_config, TemplateVars};

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> TestbedResult<()> {
    let cli: Cli = init();

    let agent_bin = match &cli.agent_bin {
        Some(path) => path.clone(),
        None => resolve_binary(AGENT_PATH_ENV, "otelcol")?,
    };
    let agent = Arc::new(ChildProcessRunner::new(agent_bin));

    let load = Arc::new(TcpLoadGenerator::new(localhost(cli.receiver_port)));
    let backend = Arc::new(TcpMockBackend::new(localhost(cli.backend_port)));

    let mut builder = cli
        .testbed
        .apply(Scenario::builder(
            env!("CARGO_PKG_NAME"),
            load.clone(),
            backend.clone(),
            agent.clone(),
        ))
        .with_resource_spec(
            ResourceSpec::default()
                .with_max_cpu(cli.max_cpu)
                .with_max_ram_mib(cli.max_ram_mib),
        )
        .with_cpu_profile();

    let scraper = if cli.no_scraper {
        None
    } else {
        let scraper_bin = match &cli.scraper_bin {
            Some(path) => path.clone(),
            None => resolve_binary(SCRAPER_PATH_ENV, "prometheus")?,
        };
        let scraper =
            Arc::new(ChildProcessRunner::new(scraper_bin).with_config_flag("--config.file"));
        builder = builder.with_scraper(scraper.clone(), Some(localhost(cli.scraper_port)));
        Some(scraper)
    };

    let mut scenario = builder.build()?;

    let vars = TemplateVars::new(&cli, scenario.result_dir());
    let agent_config = vars.render_file(&cli.agent_config)?;
    log::debug!("Agent config:\n{agent_config}");
    agent.prepare_config(&agent_config)?;

    if let Some(scraper) = &scraper {
        let scraper_config = match &cli.scraper_config {
            Some(path) => vars.render_file(path)?,
            None => default_scraper_config(cli.agent_metrics_port),
        };
        log::debug!("Scraper config:\n{scraper_config}");
        scraper.prepare_config(&scraper_config)?;
    }

    backend.enable_recording();

    scenario.start_backend()?;
    scenario.start_agent(Vec::<String>::new())?;
    if scraper.is_some() {
        scenario.start_scraper([
            format!("--web.listen-address=:{}", cli.scraper_port),
            "--enable-feature=otlp-write-receiver".to_string(),
            "--web.enable-remote-write-receiver".to_string(),
        ])?;
    }

    scenario.start_load(LoadOptions {
        data_items_per_second: cli.items_per_second,
        items_per_batch: cli.items_per_batch,
        parallel: cli.parallel,
    })?;

    scenario.sleep(scenario.duration());

    scenario.stop_load();

    scenario.wait_for_n(
        || load.data_items_sent() > 0,
        WAIT_TIMEOUT,
        "load generator started",
    )?;
    scenario.wait_for_n(
        || load.data_items_sent() == backend.data_items_received(),
        WAIT_TIMEOUT,
        "all data items received",
    )?;

    scenario.stop_agent();
    scenario.stop_scraper();

    for item in backend.recorded_items().iter().take(3) {
        log::info!("Received item: {item}");
    }

    scenario.stop();

    if let Some(cause) = scenario.failure_cause() {
        return Err(RunAbortedError::new(cause).into());
    }

    log::info!(
        "Sent {} items, received {}",
        load.data_items_sent(),
        backend.data_items_received()
    );

    Ok(())
}
