use std::fmt;
use std::time::Duration;

use pipelink_transport::{ListenerOptions, DEFAULT_BUFFER_SIZE};

/// Which side of the pipe a channel plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Create the pipe and wait for a peer to attach.
    Server,
    /// Attach to a pipe created elsewhere, retrying until it exists.
    Client,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Server => f.write_str("server"),
            ConnectionRole::Client => f.write_str("client"),
        }
    }
}

/// Tunables for a channel. Use struct update syntax over `Default`.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Largest single read, and the pipe buffer size where the OS allows it.
    pub buffer_size: usize,
    /// Per-attempt timeout for a client attach.
    pub connect_attempt_timeout: Duration,
    /// Sleep between client attach attempts while the pipe is not ready.
    pub retry_backoff: Duration,
    /// Sleep between non-blocking accept polls on the server side.
    pub accept_poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_attempt_timeout: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(500),
            accept_poll_interval: Duration::from_millis(10),
        }
    }
}

impl ChannelConfig {
    pub(crate) fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            buffer_size: self.buffer_size,
            poll_interval: self.accept_poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_connect_schedule() {
        let config = ChannelConfig::default();
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.connect_attempt_timeout, Duration::from_millis(10));
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert_eq!(config.accept_poll_interval, Duration::from_millis(10));

        let options = config.listener_options();
        assert_eq!(options.buffer_size, 1024);
        assert_eq!(options.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn role_display() {
        assert_eq!(ConnectionRole::Server.to_string(), "server");
        assert_eq!(ConnectionRole::Client.to_string(), "client");
    }
}
