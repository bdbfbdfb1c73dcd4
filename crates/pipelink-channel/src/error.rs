use crate::state::ConnectionState;

/// Errors that can occur in channel operations.
///
/// These never escape the public bool/event contract of [`crate::Channel`]
/// as panics; they are returned from [`crate::Channel::try_open`] or
/// rendered into [`crate::ChannelEvent::Error`] messages.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The pipe name is empty or otherwise unusable.
    #[error("invalid pipe name: {0}")]
    InvalidName(String),

    /// `open` was called while a connection attempt or session is live.
    #[error("channel is already {0}")]
    AlreadyActive(ConnectionState),

    /// A writer or pump was started without a live connection.
    #[error("Client not connected")]
    NotConnected,

    /// A writer is already draining this session's queue.
    #[error("a writer is already running for this session")]
    WriterActive,

    /// A pump is already reading this session's stream.
    #[error("a pump is already running for this session")]
    PumpActive,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pipelink_transport::TransportError),

    /// Writing a queued payload failed.
    #[error("write failed: {0}")]
    Write(std::io::Error),

    /// Reading from the pipe failed for a reason other than a clean close.
    #[error("read failed: {0}")]
    Read(std::io::Error),

    /// A background thread could not be started.
    #[error("failed to spawn {unit} thread: {source}")]
    Spawn {
        unit: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ChannelError>;
