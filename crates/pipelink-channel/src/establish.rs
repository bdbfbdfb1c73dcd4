//! Turning a pipe name into a connected stream.
//!
//! The server role creates the endpoint synchronously (so creation errors
//! surface from `open`) and waits for the peer on a background thread. The
//! client role polls on a background thread until the endpoint exists.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pipelink_transport::{PipeConnector, PipeListener, PipeName, PipeStream, TransportError};
use tracing::{debug, trace};

use crate::channel::Shared;
use crate::config::ConnectionRole;
use crate::error::{ChannelError, Result};

/// The OS object held while a connection attempt is pending.
#[derive(Debug, Clone)]
pub(crate) enum Endpoint {
    Listener(Arc<PipeListener>),
    Connector(Arc<PipeConnector>),
}

impl Endpoint {
    /// Make the attempt's thread give up at its next wait.
    pub(crate) fn destroy(&self) {
        match self {
            Endpoint::Listener(listener) => listener.destroy(),
            Endpoint::Connector(connector) => connector.destroy(),
        }
    }
}

/// Server endpoint: hands out the one peer that attaches.
pub(crate) trait Accept {
    fn accept(&self) -> std::result::Result<PipeStream, TransportError>;
}

/// Client endpoint: single attach attempts plus an interruptible sleep.
pub(crate) trait Dial {
    fn try_connect(&self, timeout: Duration) -> std::result::Result<PipeStream, TransportError>;
    /// Returns `false` if the endpoint was destroyed while sleeping.
    fn backoff(&self, delay: Duration) -> bool;
}

impl Accept for PipeListener {
    fn accept(&self) -> std::result::Result<PipeStream, TransportError> {
        PipeListener::accept(self)
    }
}

impl Dial for PipeConnector {
    fn try_connect(&self, timeout: Duration) -> std::result::Result<PipeStream, TransportError> {
        PipeConnector::try_connect(self, timeout)
    }

    fn backoff(&self, delay: Duration) -> bool {
        PipeConnector::backoff(self, delay)
    }
}

pub(crate) fn start(shared: &Arc<Shared>, name: PipeName) -> Result<()> {
    let options = shared.config.listener_options();
    let (generation, endpoint) = shared.begin(name, |name| match shared.role {
        ConnectionRole::Server => {
            PipeListener::create(name, options).map(|l| Endpoint::Listener(Arc::new(l)))
        }
        ConnectionRole::Client => {
            PipeConnector::new(name).map(|c| Endpoint::Connector(Arc::new(c)))
        }
    })?;

    let thread_shared = shared.clone();
    let spawned = thread::Builder::new()
        .name(format!("pipelink-{}-establish", shared.role))
        .spawn(move || match endpoint {
            Endpoint::Listener(listener) => {
                debug!(path = ?listener.path(), "waiting for peer");
                run_server(&thread_shared, generation, listener.as_ref());
            }
            Endpoint::Connector(connector) => {
                run_client(&thread_shared, generation, connector.as_ref());
            }
        });

    match spawned {
        Ok(handle) => {
            shared.set_establisher(handle);
            Ok(())
        }
        Err(source) => {
            shared.abandon(generation);
            Err(ChannelError::Spawn {
                unit: "establisher",
                source,
            })
        }
    }
}

pub(crate) fn run_server<A: Accept + ?Sized>(shared: &Shared, generation: u64, listener: &A) {
    match listener.accept() {
        Ok(stream) => {
            shared.attach(generation, stream);
        }
        Err(TransportError::Shutdown) => {
            debug!(generation, "listener destroyed before a peer attached");
        }
        Err(err) => {
            shared.abandon(generation);
            shared.report(ChannelError::Transport(err));
        }
    }
}

pub(crate) fn run_client<D: Dial + ?Sized>(shared: &Shared, generation: u64, connector: &D) {
    let config = &shared.config;
    let mut attempts = 0u64;
    loop {
        attempts += 1;
        match connector.try_connect(config.connect_attempt_timeout) {
            Ok(stream) => {
                debug!(attempts, "attached to pipe");
                shared.attach(generation, stream);
                return;
            }
            Err(err) if err.is_not_ready() => {
                trace!(attempts, "pipe not ready; backing off");
                if !connector.backoff(config.retry_backoff) {
                    debug!(attempts, "connector destroyed while retrying");
                    return;
                }
            }
            Err(TransportError::Shutdown) => {
                debug!(attempts, "connector destroyed");
                return;
            }
            Err(err) => {
                // Anything but "not there yet" means the pipe went away for good.
                debug!(attempts, error = %err, "pipe withdrawn; giving up");
                shared.abandon(generation);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::config::ChannelConfig;
    use crate::state::ConnectionState;
    use crate::ChannelEvent;

    /// Put `shared` into Connecting the way `open` does, without a thread.
    fn connecting(shared: &Shared) -> u64 {
        let name = PipeName::resolve("pipelink-establish-test").unwrap();
        let (generation, _endpoint) = shared
            .begin(name, |name| {
                PipeConnector::new(name).map(|c| Endpoint::Connector(Arc::new(c)))
            })
            .unwrap();
        assert_eq!(shared.current_state(), ConnectionState::Connecting);
        generation
    }

    struct FailingAcceptor;

    impl Accept for FailingAcceptor {
        fn accept(&self) -> std::result::Result<PipeStream, TransportError> {
            Err(TransportError::Accept(io::Error::other("accept exploded")))
        }
    }

    /// Replays a fixed list of attempt outcomes and records the waits.
    #[derive(Default)]
    struct ScriptedDialer {
        outcomes: Mutex<VecDeque<TransportError>>,
        attempt_timeouts: Mutex<Vec<Duration>>,
        backoffs: Mutex<Vec<Duration>>,
    }

    impl ScriptedDialer {
        fn new(outcomes: Vec<TransportError>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Self::default()
            }
        }
    }

    impl Dial for ScriptedDialer {
        fn try_connect(&self, timeout: Duration) -> std::result::Result<PipeStream, TransportError> {
            self.attempt_timeouts.lock().unwrap().push(timeout);
            Err(self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TransportError::Shutdown))
        }

        fn backoff(&self, delay: Duration) -> bool {
            self.backoffs.lock().unwrap().push(delay);
            true
        }
    }

    fn not_ready() -> TransportError {
        TransportError::NotReady {
            path: "pipelink-establish-test".into(),
        }
    }

    #[test]
    fn accept_failure_reports_error_and_resets_state() {
        let shared = Shared::for_test(ConnectionRole::Server);
        let events = shared.events.subscribe();
        let generation = connecting(&shared);

        run_server(&shared, generation, &FailingAcceptor);

        assert_eq!(shared.current_state(), ConnectionState::Disconnected);
        match events.try_recv() {
            Some(ChannelEvent::Error(err)) => {
                assert!(err.message.contains("accept exploded"), "{}", err.message)
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(events.try_recv(), None);
    }

    #[test]
    fn client_retries_on_default_schedule_then_abandons_silently() {
        let shared = Shared::for_test(ConnectionRole::Client);
        let events = shared.events.subscribe();
        let generation = connecting(&shared);

        let dialer = ScriptedDialer::new(vec![
            not_ready(),
            not_ready(),
            TransportError::Connect {
                path: "pipelink-establish-test".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
        ]);
        run_client(&shared, generation, &dialer);

        assert_eq!(shared.current_state(), ConnectionState::Disconnected);
        assert_eq!(events.try_recv(), None);

        let defaults = ChannelConfig::default();
        assert_eq!(
            *dialer.attempt_timeouts.lock().unwrap(),
            vec![defaults.connect_attempt_timeout; 3]
        );
        assert_eq!(
            *dialer.backoffs.lock().unwrap(),
            vec![defaults.retry_backoff; 2]
        );
    }

    #[test]
    fn destroyed_connector_leaves_closed_state_alone() {
        let shared = Shared::for_test(ConnectionRole::Client);
        let events = shared.events.subscribe();
        let generation = connecting(&shared);
        shared.close();

        run_client(&shared, generation, &ScriptedDialer::new(Vec::new()));

        assert_eq!(shared.current_state(), ConnectionState::Disconnected);
        assert_eq!(events.try_recv(), None);
    }
}
