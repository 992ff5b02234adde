use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// A broadcast signal that can be fired exactly once.
///
/// The first call to [ShutdownHandle::shutdown] flips an atomic guard and notifies every listener.
/// Any later call is ignored. Listeners created after the signal fired still observe it, because
/// they check the guard before waiting on the channel.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
    fired: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fire the signal.
    ///
    /// Returns `true` if this call fired the signal and `false` if it had already been fired.
    pub fn shutdown(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if let Err(e) = self.sender.send(()) {
            // Will fail if nobody is subscribed yet. Late listeners see the guard instead.
            log::trace!("No listeners for shutdown signal: {e:?}");
        }

        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe(), self.fired.clone())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    fired: Arc<AtomicBool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<()>, fired: Arc<AtomicBool>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            fired,
        }
    }

    /// Point in time check if the signal has been fired.
    pub fn should_shutdown(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait for the signal to be fired. Returns immediately if it already has been.
    ///
    /// It is safe to race this with another future so that the signal can be used to cancel other
    /// work in progress.
    pub async fn wait_for_shutdown(&mut self) {
        if self.should_shutdown() {
            return;
        }

        let mut receiver = self.receiver.lock().await;

        // A clone of this listener may have consumed the notification while we waited for the lock.
        if self.should_shutdown() {
            return;
        }

        match receiver.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => {
                if !self.should_shutdown() {
                    // Every handle is gone without firing, so the signal can never arrive.
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}
