use testbed_core::prelude::FailureSignal;
use tokio::signal;

use crate::executor::Executor;

/// Treat Ctrl-C as a run failure so that every waiter is released and teardown runs.
pub(crate) fn start_interrupt_listener(executor: &Executor, failure: FailureSignal) {
    executor.spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("Received interrupt, shutting down...");
                failure.fire("Scenario", "Interrupted");
            }
            Err(e) => log::warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });
}
