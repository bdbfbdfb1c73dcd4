use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

/// Something observable happened on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A peer attached; the channel is now connected.
    Connected,
    /// The peer closed the pipe, or the session ended on a read fault.
    Disconnected,
    /// One read's worth of inbound bytes. Not necessarily a whole line.
    DataReceived(ReceivedData),
    /// A failure in the establish, write or read path.
    Error(ErrorEvent),
}

impl ChannelEvent {
    pub(crate) fn error(message: impl Into<String>) -> Self {
        ChannelEvent::Error(ErrorEvent {
            message: message.into(),
        })
    }

    /// Short name for logs and output.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::Connected => "connected",
            ChannelEvent::Disconnected => "disconnected",
            ChannelEvent::DataReceived(_) => "data",
            ChannelEvent::Error(_) => "error",
        }
    }
}

/// Inbound payload, decoded as UTF-8 with replacement characters for
/// malformed sequences. `raw` keeps the bytes as read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedData {
    pub text: String,
    pub raw: Bytes,
}

impl ReceivedData {
    pub(crate) fn from_bytes(raw: Bytes) -> Self {
        let text = String::from_utf8_lossy(&raw).into_owned();
        Self { text, raw }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
}

/// Identifies one subscription for [`crate::Channel::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving end of a channel subscription.
///
/// Events are buffered without bound; dropping the subscription
/// unregisters it on the next emission.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: Receiver<ChannelEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Block until the next event. `None` once the channel is gone.
    pub fn recv(&self) -> Option<ChannelEvent> {
        self.rx.recv().ok()
    }

    /// Block for up to `timeout`. `None` on timeout or once the channel is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChannelEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<ChannelEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking iterator that ends when the channel is dropped or the
    /// subscription is removed.
    pub fn iter(&self) -> impl Iterator<Item = ChannelEvent> + '_ {
        self.rx.iter()
    }
}

/// Fan-out of events to every live subscriber. Emission never blocks.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<(SubscriberId, Sender<ChannelEvent>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel();
        self.lock().push((id, tx));
        Subscription { id, rx }
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub(crate) fn emit(&self, event: ChannelEvent) {
        let mut subscribers = self.lock();
        trace!(
            kind = event.kind(),
            subscribers = subscribers.len(),
            "emitting event"
        );
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriberId, Sender<ChannelEvent>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
