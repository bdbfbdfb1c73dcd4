//! Line-oriented duplex channels over named pipes.
//!
//! pipelink connects two processes through an OS named pipe (a Unix domain
//! socket on Unix) in either role: the side that creates the pipe and waits,
//! or the side that attaches and keeps retrying until the pipe appears, as
//! when talking to a hypervisor's serial-port pipe.
//!
//! # Crate Structure
//!
//! - [`transport`]: Pipe endpoints and the duplex stream
//! - [`channel`]: Connection lifecycle, outbound queue, inbound pump, events

/// Re-export transport types.
pub mod transport {
    pub use pipelink_transport::*;
}

/// Re-export channel types.
pub mod channel {
    pub use pipelink_channel::*;
}

pub use pipelink_channel::{Channel, ChannelConfig, ChannelEvent, ConnectionRole, ConnectionState};
