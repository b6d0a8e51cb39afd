use thiserror::Error;

/// Failure surface of the session layer.
///
/// Connection-level variants reach the application through the error
/// callback; request-level variants reject only the future of the call that
/// produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("timed out waiting for the connection to open")]
    ConnectionTimeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    RequestTimeout,
    #[error("server error: {message}")]
    Server {
        message: String,
        code: Option<String>,
    },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Structured error code supplied by the peer, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            SessionError::Server { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
