//! Line-oriented duplex channel over a named pipe.
//!
//! A [`Channel`] plays one of two roles:
//! - [`ConnectionRole::Server`] creates the pipe and waits for a peer
//! - [`ConnectionRole::Client`] attaches to a pipe someone else created,
//!   polling until it appears
//!
//! Once connected, the caller starts a writer thread that drains the
//! outbound queue fed by [`Channel::submit`], and a pump thread that turns
//! inbound bytes into [`ChannelEvent::DataReceived`]. Everything observable
//! is delivered as a [`ChannelEvent`] to subscribers; no operation on the
//! channel blocks on I/O.
//!
//! ```no_run
//! use pipelink_channel::{Channel, ChannelEvent, ConnectionRole};
//!
//! let channel = Channel::new(ConnectionRole::Client);
//! let events = channel.subscribe();
//! assert!(channel.open("vm-serial"));
//!
//! for event in events.iter() {
//!     match event {
//!         ChannelEvent::Connected => {
//!             channel.start_session();
//!             channel.submit("status\r\n");
//!         }
//!         ChannelEvent::DataReceived(data) => print!("{}", data.text),
//!         ChannelEvent::Disconnected => break,
//!         ChannelEvent::Error(err) => eprintln!("{}", err.message),
//!     }
//! }
//! ```

mod channel;
pub mod config;
mod establish;
pub mod error;
pub mod event;
mod pump;
mod queue;
pub mod state;
mod writer;

pub use channel::Channel;
pub use config::{ChannelConfig, ConnectionRole};
pub use error::{ChannelError, Result};
pub use event::{ChannelEvent, ErrorEvent, ReceivedData, SubscriberId, Subscription};
pub use state::ConnectionState;
