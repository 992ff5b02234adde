use std::fmt::Display;
use std::sync::{Arc, OnceLock};

use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};

/// The single cross-task error channel of a run.
///
/// Any component that detects a failure nobody is synchronously waiting on fires this signal. The
/// first cause is recorded and logged, every waiter is released, and any later fire is ignored so
/// that the original cause is kept.
#[derive(Debug, Clone)]
pub struct FailureSignal {
    run_name: Arc<str>,
    handle: ShutdownHandle,
    cause: Arc<OnceLock<String>>,
}

impl FailureSignal {
    pub fn new(run_name: &str) -> Self {
        Self {
            run_name: Arc::from(run_name),
            handle: ShutdownHandle::new(),
            cause: Arc::new(OnceLock::new()),
        }
    }

    /// Record `cause` for `component` and release every waiter.
    ///
    /// Returns `true` if this call fired the signal. If the signal has already fired then the new
    /// cause is only logged at debug level and `false` is returned.
    pub fn fire(&self, component: &str, cause: impl Display) -> bool {
        let cause = format!("{component}: {cause}");

        if let Err(cause) = self.cause.set(cause) {
            log::debug!(
                "[{}] Ignoring failure after the run already failed: {cause}",
                self.run_name
            );
            return false;
        }

        if let Some(cause) = self.cause.get() {
            log::error!("[{}] {cause}", self.run_name);
        }
        self.handle.shutdown()
    }

    pub fn is_fired(&self) -> bool {
        self.handle.is_shutdown()
    }

    /// The cause recorded by the first [FailureSignal::fire].
    pub fn cause(&self) -> Option<String> {
        self.cause.get().cloned()
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        self.handle.new_listener()
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }
}
