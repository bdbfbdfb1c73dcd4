use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Lock-free cell holding a [`ConnectionState`], readable from any thread.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        match self.0.load(Ordering::SeqCst) {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn swap(&self, state: ConnectionState) -> ConnectionState {
        match self.0.swap(state as u8, Ordering::SeqCst) {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_load_and_swap() {
        let state = AtomicState::new(ConnectionState::Disconnected);
        state.store(ConnectionState::Connecting);
        assert_eq!(state.load(), ConnectionState::Connecting);
        assert_eq!(
            state.swap(ConnectionState::Connected),
            ConnectionState::Connecting
        );
        assert_eq!(state.load(), ConnectionState::Connected);
    }
}
