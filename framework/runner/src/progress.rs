use std::cmp::min;
use std::fmt::Write;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use testbed_core::prelude::DelegatedShutdownListener;

use crate::types::TestbedResult;

const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

fn style(planned: Duration) -> ProgressStyle {
    let hours = planned.as_secs() / 3600;
    let minutes = (planned.as_secs() % 3600) / 60;
    let seconds = planned.as_secs() % 60;

    match ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned}]",
    ) {
        Ok(style) => style
            .with_key(
                "planned",
                move |_: &ProgressState, w: &mut dyn Write| {
                    let _ = write!(w, "{hours:02}:{minutes:02}:{seconds:02}");
                },
            )
            .progress_chars("#>-"),
        Err(e) => {
            log::debug!("Falling back to the default progress style: {e}");
            ProgressStyle::default_bar()
        }
    }
}

/// Show how much of `planned` is left until it has elapsed or `listener` fires.
pub(crate) fn start_progress(
    planned: Duration,
    listener: DelegatedShutdownListener,
) -> TestbedResult<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start = Instant::now();
            let pb = ProgressBar::new(planned.as_secs());
            pb.set_style(style(planned));

            while !listener.should_shutdown() && start.elapsed() < planned {
                pb.set_position(min(start.elapsed().as_secs(), planned.as_secs()));
                std::thread::sleep(REFRESH_INTERVAL);
            }

            log::trace!("Progress display finished");
            pb.finish_and_clear();
        })?;

    Ok(handle)
}
