//! Contactless hardware events and the bus that delivers them.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use parking_lot::Mutex;
use tracing::trace;

/// Events raised by the contactless hardware
pub enum NfcEvent<C> {
    /// A card entered the field, with a command channel to it
    Connected(C),
    /// The card left the field
    Disconnected,
    /// The operator dismissed the platform's scanning prompt
    UserCancelled,
    /// No card was presented in time
    Timeout,
}

impl<C> NfcEvent<C> {
    /// Short name for logs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Disconnected => "disconnected",
            Self::UserCancelled => "user-cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl<C> fmt::Debug for NfcEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Platform control surface for the contactless reader.
///
/// Listening control is best effort: stopping does not interrupt an exchange
/// already in flight.
pub trait NfcController {
    /// Command channel handed out with [`NfcEvent::Connected`]
    type Channel;

    /// Start polling for a card, showing `prompt` where the platform supports it
    fn start_listening(&self, prompt: &str);

    /// Stop polling and dismiss the prompt
    fn stop_listening(&self);

    /// Subscribe to hardware events until the returned guard is dropped
    fn subscribe(&self) -> Subscription<Self::Channel>;
}

struct Subscribers<C> {
    next_id: u64,
    senders: Vec<(u64, Sender<NfcEvent<C>>)>,
}

/// Delivers hardware events to the most recent live subscriber.
///
/// A connected card cannot be shared, so events are not broadcast: the newest
/// session owns the reader until its subscription is dropped.
pub struct EventBus<C> {
    inner: Arc<Mutex<Subscribers<C>>>,
}

impl<C> Clone for EventBus<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<C> EventBus<C> {
    /// Bus without subscribers
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                senders: Vec::new(),
            })),
        }
    }

    /// Register a subscriber, which becomes the one events go to
    pub fn subscribe(&self) -> Subscription<C> {
        let (sender, receiver) = unbounded();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.senders.push((id, sender));

        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event`, returning `false` when nobody is listening
    pub fn publish(&self, mut event: NfcEvent<C>) -> bool {
        let mut inner = self.inner.lock();
        while let Some((id, sender)) = inner.senders.last() {
            match sender.send(event) {
                Ok(()) => {
                    trace!(subscriber = id, "Delivered NFC event");
                    return true;
                }
                Err(returned) => {
                    event = returned.into_inner();
                    inner.senders.pop();
                }
            }
        }
        trace!(event = event.kind(), "Dropping NFC event without subscribers");
        false
    }

    /// Live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

/// Receiving end of a bus subscription. Dropping it unsubscribes.
pub struct Subscription<C> {
    id: u64,
    receiver: Receiver<NfcEvent<C>>,
    bus: Weak<Mutex<Subscribers<C>>>,
}

impl<C> fmt::Debug for Subscription<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.receiver.len())
            .finish()
    }
}

impl<C> Subscription<C> {
    /// Next pending event, if any
    pub fn try_recv(&self) -> Option<NfcEvent<C>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<NfcEvent<C>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl<C> Drop for Subscription<C> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().senders.retain(|(id, _)| *id != self.id);
        }
    }
}
