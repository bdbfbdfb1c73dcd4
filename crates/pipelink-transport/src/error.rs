use std::path::PathBuf;

/// Errors that can occur in pipe transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The pipe name is empty or contains characters the platform rejects.
    #[error("invalid pipe name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The resolved endpoint path is too long for the platform.
    #[error("pipe path too long ({len} bytes, max {max}): {path}")]
    NameTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// Failed to create the listening endpoint.
    #[error("failed to create pipe {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to attach to the named endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The endpoint does not exist yet, or is busy serving another peer.
    #[error("pipe {path} not ready")]
    NotReady { path: PathBuf },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint has been destroyed.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Whether this error means "try again later" rather than a real fault.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, TransportError::NotReady { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
