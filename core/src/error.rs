use thiserror::Error;

/// Error taxonomy shared by the fetcher, the file writer and the client.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Bad input from the caller: malformed URL, directory where a file was
    /// expected, an invalid Content-Range header, etc.
    #[error("validation error: {0}")]
    Validation(String),

    /// Anything that went wrong talking to the network: connection refused,
    /// TLS failure, proxy misconfiguration, or a response whose status code
    /// the caller didn't expect.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer answered but didn't honor the protocol: a task ID mismatch,
    /// a missing/garbled header, a hash that doesn't match.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local filesystem failure.
    #[error("resource error: {0}")]
    Resource(#[from] std::io::Error),

    /// The operation was cancelled, usually because a sibling worker failed
    /// first and the shared cancellation token was tripped.
    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        TransferError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for TransferError {
    fn from(e: url::ParseError) -> Self {
        TransferError::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
