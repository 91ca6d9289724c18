//! Typed errors raised by stations and the connection pool.
//!
//! Application plumbing (config, pipeline construction, CLI) uses
//! [`anyhow::Result`]; the types here exist where callers need to branch on
//! the kind of failure, e.g. the coordinator deciding whether a station
//! failure is worth another attempt.

use thiserror::Error;

/// Failure reported by a [`Station`](crate::traits::Station).
#[derive(Debug, Error)]
pub enum StationError {
    /// The station cannot evaluate one of the requested criteria.
    ///
    /// The coordinator records this as a skipped station, not a failure.
    #[error("{0}")]
    UnsupportedCriterion(String),

    /// A failure the station itself knows to be temporary.
    #[error("{0}")]
    Transient(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StationError {
    pub fn unsupported_operation(op: impl std::fmt::Display) -> Self {
        Self::UnsupportedCriterion(format!("Unsupported operation: {}", op))
    }

    /// Render the error with its full cause chain, `outer: inner: ...`.
    pub fn chain_message(&self) -> String {
        match self {
            StationError::Other(e) => format!("{:#}", e),
            other => {
                let mut msg = other.to_string();
                let mut source = std::error::Error::source(other);
                while let Some(cause) = source {
                    let text = cause.to_string();
                    if !msg.ends_with(&text) {
                        msg.push_str(": ");
                        msg.push_str(&text);
                    }
                    source = cause.source();
                }
                msg
            }
        }
    }
}

/// Failure reported by the [`ConnectionPool`](crate::pool::ConnectionPool).
///
/// Connect failures are not errors here: they are recorded on the shared
/// connection and exposed through the lease.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid UNC share path: {0}")]
    InvalidSharePath(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn unsupported_operation_message() {
        let err = StationError::unsupported_operation("LIKE");
        assert_eq!(err.to_string(), "Unsupported operation: LIKE");
    }

    #[test]
    fn chain_message_includes_causes() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("disk offline"));
        let err = StationError::from(inner.context("reading folder inbound").unwrap_err());
        assert_eq!(err.chain_message(), "reading folder inbound: disk offline");
    }

    #[test]
    fn chain_message_for_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "an unexpected network error occurred");
        let err = StationError::from(io);
        assert_eq!(err.chain_message(), "an unexpected network error occurred");
    }
}
