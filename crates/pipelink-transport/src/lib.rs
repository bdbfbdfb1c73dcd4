//! Named-pipe transport endpoints.
//!
//! Provides the two ways of obtaining a connected duplex [`PipeStream`]:
//! - [`PipeListener`] creates the named endpoint and waits for a peer (server side)
//! - [`PipeConnector`] attaches to an endpoint someone else created (client side)
//!
//! On Unix a "named pipe" is a Unix domain socket at a resolved path. On
//! Windows it is a real `\\.\pipe\` named pipe. Both endpoint types can be
//! destroyed from another thread, which makes any blocked accept or retry
//! backoff return [`TransportError::Shutdown`].

pub mod error;
pub mod name;
pub mod signal;
pub mod stream;

#[cfg(unix)]
pub mod uds;

#[cfg(windows)]
pub mod named_pipe;

pub use error::{Result, TransportError};
pub use name::PipeName;
pub use signal::ShutdownSignal;
pub use stream::PipeStream;

#[cfg(unix)]
pub use uds::{PipeConnector, PipeListener};

#[cfg(windows)]
pub use named_pipe::{PipeConnector, PipeListener};

/// Default size of a single I/O operation, and of the pipe buffers on
/// platforms that let us pick them.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Options applied when creating a listening endpoint.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// In/out buffer size requested from the OS (Windows only).
    pub buffer_size: usize,
    /// How long a non-blocking accept sleeps between polls.
    pub poll_interval: std::time::Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval: std::time::Duration::from_millis(10),
        }
    }
}
