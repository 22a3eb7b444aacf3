//! Error taxonomy for the bridge.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Why the host refused a sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Access/verify code pair was not accepted.
    BadCredentials,
    /// The host requires the verify code to be changed before sign-in.
    VerifyCodeChangeRequired,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadCredentials => f.write_str("access code or verify code not accepted"),
            Self::VerifyCodeChangeRequired => f.write_str("verify code must be changed"),
        }
    }
}

/// Violations of the prompt-matching conversation with the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFailure {
    /// No candidate marker arrived before the deadline.
    Timeout(Duration),
    /// Negotiation ran out of rounds without reaching the main menu.
    UnrecognizedHostState { rounds: usize },
    /// The wait was abandoned through its cancellation token.
    Cancelled,
}

impl std::fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "timeout after {}ms", after.as_millis()),
            Self::UnrecognizedHostState { rounds } => {
                write!(f, "unrecognized host state after {rounds} rounds")
            }
            Self::Cancelled => f.write_str("wait cancelled"),
        }
    }
}

/// Main error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Sign-in refused by the host
    #[error("Authentication error: {0}")]
    Authentication(AuthFailure),

    /// Negotiation bound or wait deadline exceeded
    #[error("Protocol error: {0}")]
    Protocol(ProtocolFailure),

    /// Channel unreachable or unexpectedly closed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Write attempted against a disposed channel
    #[error("Stale session: channel has been disposed")]
    StaleSession,

    /// Browser terminal did not answer a query
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Session actor is no longer running
    #[error("Session closed")]
    SessionClosed,
}

impl BridgeError {
    /// Classify an I/O error raised while writing to the channel.
    ///
    /// Errors meaning the other end is gone map to [`BridgeError::StaleSession`].
    #[must_use]
    pub fn from_write(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => Self::StaleSession,
            _ => Self::Connection(err.to_string()),
        }
    }

    /// Whether this error is the self-healing stale channel case.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleSession)
    }
}

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_are_distinguishable() {
        let bad = BridgeError::Authentication(AuthFailure::BadCredentials).to_string();
        let reset =
            BridgeError::Authentication(AuthFailure::VerifyCodeChangeRequired).to_string();
        assert_ne!(bad, reset);
        assert!(reset.contains("verify code must be changed"));
    }

    #[test]
    fn test_unrecognized_state_message() {
        let err = BridgeError::Protocol(ProtocolFailure::UnrecognizedHostState { rounds: 20 });
        assert_eq!(
            err.to_string(),
            "Protocol error: unrecognized host state after 20 rounds"
        );
    }

    #[test]
    fn test_write_errors_classified() {
        let gone = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(BridgeError::from_write(&gone).is_stale());

        let other = std::io::Error::other("disk on fire");
        assert!(matches!(
            BridgeError::from_write(&other),
            BridgeError::Connection(_)
        ));
    }
}
