use std::fmt::Display;
use std::time::Duration;

use testbed_core::prelude::{ConditionTimeoutError, DelegatedShutdownListener};
use tokio::time::Instant;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
pub const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Doubling intervals starting at [INITIAL_BACKOFF] and capped at [MAX_BACKOFF].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    pub fn next_interval(&mut self) -> Duration {
        let current = self.next;
        self.next = (current * 2).min(MAX_BACKOFF);
        current
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_interval())
    }
}

/// Poll `condition` with exponential backoff until it holds, the timeout elapses or the listener
/// fires.
///
/// Returns `Ok(true)` when the condition held and `Ok(false)` when the wait was abandoned because
/// the listener fired, including when it had fired before the call.
///
/// The timeout is checked after each sleep, so the wait overruns `timeout` by at most one backoff
/// interval.
pub async fn wait_for<F>(
    mut condition: F,
    timeout: Duration,
    description: impl Display,
    listener: &mut DelegatedShutdownListener,
) -> Result<bool, ConditionTimeoutError>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut backoff = Backoff::default();

    loop {
        if listener.should_shutdown() {
            return Ok(false);
        }

        if condition() {
            log::trace!("Condition met after {:?}: {description}", start.elapsed());
            return Ok(true);
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff.next_interval()) => {}
            _ = listener.wait_for_shutdown() => {
                log::debug!("Stopped waiting for {description}, run is shutting down");
                return Ok(false);
            }
        }

        if start.elapsed() > timeout {
            return Err(ConditionTimeoutError::new(description, timeout));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use testbed_core::prelude::ShutdownHandle;

    use super::*;

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let intervals = Backoff::default()
            .take(10)
            .map(|d| d.as_millis())
            .collect::<Vec<_>>();

        assert_eq!(
            vec![5, 10, 20, 40, 80, 160, 320, 500, 500, 500],
            intervals
        );
    }

    #[tokio::test(start_paused = true)]
    async fn always_true_returns_immediately() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        let start = Instant::now();
        let met = wait_for(|| true, Duration::from_secs(1), "nothing", &mut listener)
            .await
            .unwrap();

        assert!(met);
        assert!(start.elapsed() <= INITIAL_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn always_false_times_out_within_one_interval() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        let timeout = Duration::from_millis(300);

        let start = Instant::now();
        let err = wait_for(|| false, timeout, "the impossible", &mut listener)
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + MAX_BACKOFF);
        assert_eq!(
            "Timed out after 300ms waiting for the impossible",
            err.to_string()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_is_polled_with_backoff() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let record = calls.clone();
        let _ = wait_for(
            move || {
                record.lock().push(Instant::now());
                false
            },
            Duration::from_millis(2_500),
            "a long wait",
            &mut listener,
        )
        .await;

        let calls = calls.lock();
        assert!(*calls.last().unwrap() - calls[0] >= Duration::from_secs(2));

        let mut expected = Backoff::default();
        for pair in calls.windows(2) {
            let gap = pair[1] - pair[0];
            let want = expected.next_interval();
            assert!(gap >= want, "gap {gap:?} shorter than {want:?}");
            assert!(gap < want + Duration::from_millis(2), "gap {gap:?} longer than {want:?}");
            assert!(gap <= MAX_BACKOFF + Duration::from_millis(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_wait() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        let trigger = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.shutdown();
        });

        let met = wait_for(|| false, Duration::from_secs(10), "never", &mut listener)
            .await
            .unwrap();

        assert!(!met);
    }
}
