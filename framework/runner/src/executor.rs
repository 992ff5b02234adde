use std::future::Future;

use anyhow::Context;
use testbed_core::prelude::DelegatedShutdownListener;
use tokio::task::JoinHandle;

use crate::types::TestbedResult;

/// Owns the async runtime that a scenario runs its collaborators and background tasks on.
///
/// The scenario API is synchronous; every call into an async collaborator goes through
/// [Executor::execute_in_place].
#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
}

impl Executor {
    pub(crate) fn new() -> TestbedResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("testbed")
            .build()
            .context("Failed to create Tokio runtime")?;

        Ok(Self { runtime })
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// The future is not cancelled when the run fails. Teardown relies on this to finish stopping
    /// every component after a failure.
    pub fn execute_in_place<T>(&self, fut: impl Future<Output = T>) -> T {
        self.runtime.block_on(fut)
    }

    /// Run async code in place until it completes or the listener fires.
    ///
    /// Returns [None] if the listener fired first, in which case the future is dropped.
    pub fn execute_until_signalled<T>(
        &self,
        fut: impl Future<Output = T>,
        mut listener: DelegatedShutdownListener,
    ) -> Option<T> {
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => Some(result),
                _ = listener.wait_for_shutdown() => None,
            }
        })
    }

    /// Submit async code to be run in the background.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(fut)
    }
}
