use std::time::Duration;

/// A condition polled during a run never became true within its time budget.
///
/// This is fatal to the run. There is no retry, a subsystem that does not respond during a
/// benchmark points at a broken setup rather than a transient problem.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq)]
#[display("Timed out after {timeout:?} waiting for {description}")]
pub struct ConditionTimeoutError {
    description: String,
    timeout: Duration,
}

impl ConditionTimeoutError {
    pub fn new(description: impl ToString, timeout: Duration) -> Self {
        Self {
            description: description.to_string(),
            timeout,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Return this error when a run cannot continue because the failure signal has fired.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("Run aborted: {cause}")]
pub struct RunAbortedError {
    cause: String,
}

impl RunAbortedError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

impl Default for RunAbortedError {
    fn default() -> Self {
        Self {
            cause: "Execution cancelled by failure signal".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_description() {
        let err = ConditionTimeoutError::new(
            format!("connection to {}", "127.0.0.1:4317"),
            Duration::from_secs(10),
        );

        assert_eq!(
            "Timed out after 10s waiting for connection to 127.0.0.1:4317",
            err.to_string()
        );
    }
}
