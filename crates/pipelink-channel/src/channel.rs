use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use pipelink_transport::{PipeName, PipeStream, TransportError};
use tracing::{debug, info, warn};

use crate::config::{ChannelConfig, ConnectionRole};
use crate::error::{ChannelError, Result};
use crate::establish::{self, Endpoint};
use crate::event::{ChannelEvent, EventBus, ReceivedData, SubscriberId, Subscription};
use crate::pump;
use crate::queue::OutboundQueue;
use crate::state::{AtomicState, ConnectionState};
use crate::writer;

/// A duplex text channel over one named pipe, in a fixed role.
///
/// The channel owns the pipe stream while connected, the listener or
/// connector while connecting, and the outbound queue throughout. Dropping
/// the channel closes it.
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    pub fn new(role: ConnectionRole) -> Self {
        Self::with_config(role, ChannelConfig::default())
    }

    pub fn with_config(role: ConnectionRole, config: ChannelConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(role, config)),
        }
    }

    /// Start establishing a connection on `name`.
    ///
    /// Returns `false` if the name is empty or unusable, if the endpoint
    /// cannot be created, or if the channel is already connecting or
    /// connected. Otherwise a background thread has been started and the
    /// outcome arrives later as [`ChannelEvent::Connected`].
    pub fn open(&self, name: &str) -> bool {
        match self.try_open(name) {
            Ok(()) => true,
            Err(err) => {
                debug!(name, role = %self.shared.role, error = %err, "open rejected");
                false
            }
        }
    }

    /// Like [`Channel::open`], but reports why the request was rejected.
    pub fn try_open(&self, name: &str) -> Result<()> {
        let name = PipeName::resolve(name).map_err(|err| match err {
            TransportError::InvalidName { .. } | TransportError::NameTooLong { .. } => {
                ChannelError::InvalidName(err.to_string())
            }
            other => ChannelError::Transport(other),
        })?;
        establish::start(&self.shared, name)
    }

    /// Queue `text` for transmission. Never blocks and always succeeds.
    pub fn submit(&self, text: impl Into<String>) -> bool {
        self.shared.queue.push(text.into());
        true
    }

    /// Start the thread that drains the outbound queue onto the pipe.
    ///
    /// Raises [`ChannelEvent::Error`] and returns `None` if the channel is
    /// not connected or this session already has a writer.
    pub fn start_writer(&self) -> Option<JoinHandle<()>> {
        match writer::start(&self.shared) {
            Ok(handle) => Some(handle),
            Err(err) => {
                self.shared.report(err);
                None
            }
        }
    }

    /// Start the thread that turns inbound bytes into events.
    ///
    /// Raises [`ChannelEvent::Error`] and returns `None` if the channel is
    /// not connected or this session already has a pump.
    pub fn start_pump(&self) -> Option<JoinHandle<()>> {
        match pump::start(&self.shared) {
            Ok(handle) => Some(handle),
            Err(err) => {
                self.shared.report(err);
                None
            }
        }
    }

    /// Start both the writer and the pump for the current session.
    pub fn start_session(&self) -> bool {
        let writer = self.start_writer().is_some();
        let pump = self.start_pump().is_some();
        writer && pump
    }

    /// Tear down the current session or connection attempt.
    ///
    /// Safe to call from any thread, at any time, any number of times.
    /// Pending outbound payloads are discarded.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Wait until every queued payload has been written, up to `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.shared.queue.wait_drained(timeout)
    }

    /// Number of payloads waiting to be written.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn role(&self) -> ConnectionRole {
        self.shared.role
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// The name most recently passed to a successful `open`.
    pub fn name(&self) -> Option<String> {
        self.shared
            .lock_session()
            .name
            .as_ref()
            .map(|name| name.as_str().to_string())
    }

    /// Register a new event observer.
    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.shared.events.unsubscribe(id)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// State shared between the channel handle and its background threads.
///
/// Every session (and every connection attempt) gets a fresh generation
/// number. Threads carry the generation they were started for and stop
/// acting as soon as it is no longer current, so a late accept, read or
/// write from a torn-down session cannot touch the next one.
pub(crate) struct Shared {
    pub(crate) role: ConnectionRole,
    pub(crate) config: ChannelConfig,
    pub(crate) queue: OutboundQueue,
    pub(crate) events: EventBus,
    state: AtomicState,
    generation: AtomicU64,
    session: Mutex<Session>,
}

#[derive(Default)]
pub(crate) struct Session {
    name: Option<PipeName>,
    stream: Option<PipeStream>,
    endpoint: Option<Endpoint>,
    establisher: Option<JoinHandle<()>>,
    writer_generation: Option<u64>,
    pump_generation: Option<u64>,
}

/// Per-session thread slots; each admits one thread per generation.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Writer,
    Pump,
}

impl Shared {
    fn new(role: ConnectionRole, config: ChannelConfig) -> Self {
        Self {
            role,
            config,
            queue: OutboundQueue::default(),
            events: EventBus::default(),
            state: AtomicState::new(ConnectionState::Disconnected),
            generation: AtomicU64::new(0),
            session: Mutex::new(Session::default()),
        }
    }

    pub(crate) fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current_state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Whether `generation` is the current session and it is connected.
    pub(crate) fn is_live(&self, generation: u64) -> bool {
        self.state.load() == ConnectionState::Connected
            && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Move Disconnected → Connecting, creating the endpoint under the lock.
    pub(crate) fn begin<F>(&self, name: PipeName, make: F) -> Result<(u64, Endpoint)>
    where
        F: FnOnce(&PipeName) -> std::result::Result<Endpoint, TransportError>,
    {
        let mut session = self.lock_session();
        let current = self.state.load();
        if current != ConnectionState::Disconnected {
            return Err(ChannelError::AlreadyActive(current));
        }

        let endpoint = make(&name)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.store(ConnectionState::Connecting);
        session.name = Some(name);
        session.endpoint = Some(endpoint.clone());
        Ok((generation, endpoint))
    }

    pub(crate) fn set_establisher(&self, handle: JoinHandle<()>) {
        self.lock_session().establisher = Some(handle);
    }

    /// Install `stream` as the session's pipe if `generation` is still the
    /// pending attempt; otherwise the stream is discarded.
    pub(crate) fn attach(&self, generation: u64, stream: PipeStream) -> bool {
        let mut session = self.lock_session();
        if self.generation.load(Ordering::SeqCst) != generation
            || self.state.load() != ConnectionState::Connecting
        {
            debug!(generation, "discarding connection for abandoned attempt");
            stream.shutdown();
            return false;
        }

        info!(
            role = %self.role,
            name = session.name.as_ref().map(PipeName::as_str),
            transport = stream.transport_name(),
            peer = ?stream.peer_credentials(),
            "pipe connected"
        );
        session.stream = Some(stream);
        session.endpoint = None;
        self.state.store(ConnectionState::Connected);
        self.events.emit(ChannelEvent::Connected);
        true
    }

    /// Give up a connection attempt without raising Disconnected.
    pub(crate) fn abandon(&self, generation: u64) {
        let mut session = self.lock_session();
        if self.generation.load(Ordering::SeqCst) == generation
            && self.state.load() == ConnectionState::Connecting
        {
            session.endpoint = None;
            self.state.store(ConnectionState::Disconnected);
        }
    }

    /// Clone the live stream and claim the session's writer or pump slot.
    fn claim(&self, slot: Slot) -> Result<(u64, PipeStream)> {
        let mut session = self.lock_session();
        let generation = self.generation.load(Ordering::SeqCst);
        let stream = match (&session.stream, self.state.load()) {
            (Some(stream), ConnectionState::Connected) => stream.try_clone()?,
            _ => return Err(ChannelError::NotConnected),
        };
        let (owner, busy) = match slot {
            Slot::Writer => (&mut session.writer_generation, ChannelError::WriterActive),
            Slot::Pump => (&mut session.pump_generation, ChannelError::PumpActive),
        };
        if *owner == Some(generation) {
            return Err(busy);
        }
        *owner = Some(generation);
        Ok((generation, stream))
    }

    fn release(&self, slot: Slot, generation: u64) {
        let mut session = self.lock_session();
        let owner = match slot {
            Slot::Writer => &mut session.writer_generation,
            Slot::Pump => &mut session.pump_generation,
        };
        if *owner == Some(generation) {
            *owner = None;
        }
    }

    pub(crate) fn claim_writer(&self) -> Result<(u64, PipeStream)> {
        self.claim(Slot::Writer)
    }

    pub(crate) fn release_writer(&self, generation: u64) {
        self.release(Slot::Writer, generation);
    }

    pub(crate) fn claim_pump(&self) -> Result<(u64, PipeStream)> {
        self.claim(Slot::Pump)
    }

    pub(crate) fn release_pump(&self, generation: u64) {
        self.release(Slot::Pump, generation);
    }

    /// Emit inbound data if `generation` is still the live session.
    ///
    /// Checked under the session lock, so nothing is delivered once `close`
    /// or `end_session` has returned.
    pub(crate) fn deliver(&self, generation: u64, data: ReceivedData) -> bool {
        let _session = self.lock_session();
        if !self.is_live(generation) {
            return false;
        }
        self.events.emit(ChannelEvent::DataReceived(data));
        true
    }

    /// End the session from the pump side: Connected → Disconnected and a
    /// single Disconnected event. No-op if the session already ended.
    pub(crate) fn end_session(&self, generation: u64) -> bool {
        {
            let mut session = self.lock_session();
            if !self.is_live(generation) {
                return false;
            }
            self.state.store(ConnectionState::Disconnected);
            if let Some(stream) = session.stream.take() {
                stream.shutdown();
            }
            self.events.emit(ChannelEvent::Disconnected);
        }
        self.queue.wake();
        true
    }

    pub(crate) fn close(&self) {
        {
            let mut session = self.lock_session();
            self.generation.fetch_add(1, Ordering::SeqCst);
            let previous = self.state.swap(ConnectionState::Disconnected);
            if let Some(stream) = session.stream.take() {
                stream.shutdown();
            }
            if let Some(endpoint) = session.endpoint.take() {
                endpoint.destroy();
            }
            if previous != ConnectionState::Disconnected {
                info!(role = %self.role, %previous, "channel closed");
            }
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "discarded pending payloads on close");
        }
        self.queue.wake();
    }

    pub(crate) fn report(&self, err: ChannelError) {
        warn!(role = %self.role, error = %err, "channel error");
        self.events.emit(ChannelEvent::error(err.to_string()));
    }

    #[cfg(test)]
    pub(crate) fn take_establisher(&self) -> Option<JoinHandle<()>> {
        self.lock_session().establisher.take()
    }

    #[cfg(test)]
    pub(crate) fn force_connected(&self) -> u64 {
        let _session = self.lock_session();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.store(ConnectionState::Connected);
        generation
    }

    #[cfg(test)]
    pub(crate) fn for_test(role: ConnectionRole) -> Arc<Self> {
        Arc::new(Self::new(role, ChannelConfig::default()))
    }
}
