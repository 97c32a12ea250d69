//! Error types for the call-control client

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EslResult<T> = Result<T, EslError>;

/// Errors raised by the connection, command and status layers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EslError {
    /// The session has no authenticated link to the switch.
    #[error("ESL is not connected")]
    NotConnected,

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A connect, read or command reply did not arrive in time.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The socket closed while a command was waiting for its reply.
    #[error("connection closed")]
    ConnectionClosed,

    /// Framing or message-shape violation.
    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    /// A header line without a `:` or with an unparsable value.
    #[error("invalid header: {header}")]
    InvalidHeader { header: String },

    /// The switch rejected the shared secret.
    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    /// The switch answered with an error reply (usually `-ERR ...`).
    #[error("{reply_text}")]
    CommandFailed { reply_text: String },

    /// JSON payload could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Events were dropped because the consumer fell behind.
    #[error("event queue full, events dropped")]
    QueueFull,

    /// A phone number failed normalization.
    #[error("invalid phone number: {value:?}")]
    InvalidNumber { value: String },

    /// A caller-supplied argument was rejected before reaching the wire.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl EslError {
    pub(crate) fn protocol_error(message: impl Into<String>) -> Self {
        EslError::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(reason: impl Into<String>) -> Self {
        EslError::AuthFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        EslError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        EslError::InvalidConfig {
            message: message.into(),
        }
    }

    /// `true` for failures of the link itself, as opposed to a rejected command.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            EslError::NotConnected
                | EslError::Io(_)
                | EslError::ConnectionClosed
                | EslError::Timeout { .. }
                | EslError::ProtocolError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_message() {
        assert_eq!(EslError::NotConnected.to_string(), "ESL is not connected");
    }

    #[test]
    fn command_failed_displays_switch_text() {
        let err = EslError::CommandFailed {
            reply_text: "-ERR NO_ROUTE_DESTINATION".into(),
        };
        assert_eq!(err.to_string(), "-ERR NO_ROUTE_DESTINATION");
        assert!(!err.is_connection_error());
    }

    #[test]
    fn io_converts_with_question_mark() {
        fn fails() -> EslResult<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, EslError::Io(_)));
        assert!(err.is_connection_error());
    }
}
