//! Bounded retry of station searches.
//!
//! A station failure is retried only when it is classified as transient:
//! either the station raised [`StationError::Transient`], or the error text
//! carries one of a short list of known signatures. Retries are immediate;
//! there is no backoff.

use tracing::{debug, warn};

use crate::error::StationError;

/// Default number of attempts per station per search.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Error text fragments known to indicate a temporary failure.
pub const TRANSIENT_SIGNATURES: &[&str] = &[
    "unexpected network error",
    "file sharing violation",
    "error occurred while reading from the store provider's data reader",
];

/// Is this failure worth another attempt?
pub fn is_transient(err: &StationError) -> bool {
    if matches!(err, StationError::Transient(_)) {
        return true;
    }
    let message = err.chain_message();
    TRANSIENT_SIGNATURES.iter().any(|sig| message.contains(sig))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out. `op` receives the 1-based attempt number.
    ///
    /// Returns the outcome together with the number of attempts made.
    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut(u32) -> Result<T, StationError>,
    ) -> (Result<T, StationError>, u32) {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => {
                    if attempt >= max || !is_transient(&err) {
                        if attempt > 1 {
                            warn!(station = label, attempt, "giving up: {}", err.chain_message());
                        }
                        return (Err(err), attempt);
                    }
                    debug!(station = label, attempt, "transient failure, retrying: {}", err.chain_message());
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_error() -> StationError {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            "An unexpected network error occurred.",
        )
        .into()
    }

    #[test]
    fn classification() {
        assert!(is_transient(&StationError::Transient("busy".into())));
        assert!(is_transient(&network_error()));
        assert!(is_transient(&StationError::Other(anyhow::anyhow!(
            "An error occurred while reading from the store provider's data reader. See inner."
        ))));
        assert!(!is_transient(&StationError::Other(anyhow::anyhow!("access denied"))));
        assert!(!is_transient(&StationError::unsupported_operation("LIKE")));
    }

    #[test]
    fn succeeds_on_third_attempt() {
        let policy = RetryPolicy::default();
        let (result, attempts) = policy.run("s", |attempt| {
            if attempt < 3 {
                Err(network_error())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let (result, attempts) = policy.run("s", |_| -> Result<(), _> {
            calls += 1;
            Err(StationError::Transient("file sharing violation".into()))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 4);
        assert_eq!(calls, 4);
    }

    #[test]
    fn fatal_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let (result, attempts) = policy.run("s", |_| -> Result<(), _> {
            calls += 1;
            Err(StationError::Other(anyhow::anyhow!("table does not exist")))
        });
        assert_eq!(result.unwrap_err().chain_message(), "table does not exist");
        assert_eq!((attempts, calls), (1, 1));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }
}
