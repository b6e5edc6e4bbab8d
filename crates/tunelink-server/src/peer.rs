use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tunelink_wire::Message;

use crate::error::{Result, ServerError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A client's registered interest in runtime events.
#[derive(Debug, Default)]
struct Interests {
    /// Single-shot: at most one outstanding cookie per signal id.
    signals: HashMap<u32, u32>,
    /// Repeating: every cookie registered for a broadcast id.
    broadcasts: HashMap<u32, Vec<u32>>,
}

/// Server-side handle of one connected client.
pub struct PeerHandle {
    id: u32,
    name: Mutex<Option<String>>,
    tx: mpsc::Sender<Message>,
    interests: Mutex<Interests>,
    cancel: CancellationToken,
}

impl PeerHandle {
    pub(crate) fn new(id: u32, tx: mpsc::Sender<Message>, cancel: CancellationToken) -> Self {
        Self {
            id,
            name: Mutex::new(None),
            tx,
            interests: Mutex::new(Interests::default()),
            cancel,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Name announced in the client's HELLO, if any.
    pub fn name(&self) -> Option<String> {
        lock(&self.name).clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *lock(&self.name) = Some(name.to_string());
    }

    /// Queue a message for the writer task without waiting.
    ///
    /// A full queue means the client is not reading; it is disconnected
    /// rather than allowed to stall the sender.
    pub fn enqueue(&self, message: Message) -> Result<()> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(client_id = self.id, "outgoing queue full; disconnecting");
                self.cancel.cancel();
                Err(ServerError::QueueFull(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(ServerError::PeerNotFound(self.id)),
        }
    }

    /// Ask the session to end.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_disconnecting(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Register single-shot interest, replacing an earlier cookie.
    pub(crate) fn register_signal(&self, signal: u32, cookie: u32) {
        lock(&self.interests).signals.insert(signal, cookie);
    }

    /// Register repeating interest. Duplicate cookies deliver twice.
    pub(crate) fn register_broadcast(&self, signal: u32, cookie: u32) {
        lock(&self.interests)
            .broadcasts
            .entry(signal)
            .or_default()
            .push(cookie);
    }

    /// Drop every registration for `signal`.
    pub(crate) fn unregister(&self, signal: u32) {
        let mut interests = lock(&self.interests);
        interests.signals.remove(&signal);
        interests.broadcasts.remove(&signal);
    }

    /// Consume the pending single-shot cookie for `signal`.
    pub(crate) fn take_signal(&self, signal: u32) -> Option<u32> {
        lock(&self.interests).signals.remove(&signal)
    }

    pub(crate) fn broadcast_cookies(&self, signal: u32) -> Vec<u32> {
        lock(&self.interests)
            .broadcasts
            .get(&signal)
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}
