use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// Transport-level failure: the remote host never produced an HTTP response
    /// (DNS, refused connection, TLS handshake, reset while reading the body).
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` if the failure happened below the HTTP layer and the
    /// request may succeed after re-establishing the session.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BridgeError::ConnectionFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
