use std::time::Duration;

use thiserror::Error;

/// Failure categories a caller uses to decide between retrying and aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments, malformed data or a wait that ran out of time.
    Client,
    /// Missing attestation material or a failed HSM operation.
    Security,
    /// The transport could not carry the request.
    Transport,
    /// The service explicitly rejected the request.
    Hub,
    /// The nonce exchange finished without a usable authentication key.
    Authentication,
}

/// Errors produced by a registration attempt.
#[derive(Debug, Error)]
pub enum Error {
    #[error("client error: {0}")]
    Client(String),

    /// A single correlated transport call produced no response in time.
    #[error("no {operation} response within {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The transport answered, but with nothing in it.
    #[error("empty {operation} response")]
    NoResponse { operation: &'static str },

    /// The whole attempt, polling included, outran its budget.
    #[error("registration not completed within attempt budget of {0:?}")]
    AttemptExpired(Duration),

    #[error("malformed body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("security error: {0}")]
    Security(String),

    #[error("HSM operation failed: {0:#}")]
    Hsm(#[source] anyhow::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service rejected request ({}): {message}", code.as_deref().unwrap_or("no code"))]
    Hub {
        code: Option<String>,
        message: String,
    },

    #[error("authentication error: {0}")]
    Authentication(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Client(_)
            | Error::Timeout { .. }
            | Error::NoResponse { .. }
            | Error::AttemptExpired(_)
            | Error::Serialization(_) => ErrorKind::Client,
            Error::Security(_) | Error::Hsm(_) => ErrorKind::Security,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Hub { .. } => ErrorKind::Hub,
            Error::Authentication(_) => ErrorKind::Authentication,
        }
    }

    pub(crate) fn client(msg: impl Into<String>) -> Self {
        Error::Client(msg.into())
    }

    pub(crate) fn security(msg: impl Into<String>) -> Self {
        Error::Security(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_client_kind_but_distinct() {
        let per_call = Error::Timeout {
            operation: "getStatus",
            timeout: Duration::from_secs(90),
        };
        let budget = Error::AttemptExpired(Duration::from_secs(600));

        assert_eq!(per_call.kind(), ErrorKind::Client);
        assert_eq!(budget.kind(), ErrorKind::Client);
        assert!(per_call.to_string().contains("getStatus"));
        assert!(budget.to_string().contains("attempt budget"));
    }

    #[test]
    fn hsm_failures_are_security_kind() {
        let err = Error::Hsm(anyhow::anyhow!("TPM2_Import failed"));
        assert_eq!(err.kind(), ErrorKind::Security);
        assert!(err.to_string().contains("TPM2_Import failed"));
    }

    #[test]
    fn hub_error_display_without_code() {
        let err = Error::Hub {
            code: None,
            message: "quota exceeded".into(),
        };
        assert_eq!(err.to_string(), "service rejected request (no code): quota exceeded");
    }
}
