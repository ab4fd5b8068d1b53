//! # Connection Registry
//!
//! The authoritative set of live subscriber connections. Each subscriber is
//! represented by the sending half of an unbounded MPSC channel; the receiving
//! half belongs to that connection's socket task, which performs the actual
//! network write.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: payloads are `Arc<str>`. A broadcast hands every
//!     client a new pointer to the same encoded message.
//! 2.  **Isolated Writes**: a send never waits on the transport. A connection
//!     whose task has gone away fails its own hand-off only; every other
//!     client still receives the message.
//! 3.  **Lifecycle Ownership**: entries are created by `add` and removed by
//!     `remove`, both driven by the connection handler. The registry never
//!     evicts on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, TallyError};

/// Identifier handed out for every registered connection.
pub type ClientId = Uuid;

/// An encoded notification shared across all recipients.
pub type Payload = Arc<str>;

/// Sending half of a subscriber's outbound queue.
pub type ClientSender = mpsc::UnboundedSender<Payload>;

/// Receiving half of a subscriber's outbound queue.
pub type ClientReceiver = mpsc::UnboundedReceiver<Payload>;

/// Registry of live subscriber connections keyed by generated identifiers.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: Mutex<HashMap<ClientId, ClientSender>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, ClientSender>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `sender` under a freshly generated identifier and returns it.
    pub fn add(&self, sender: ClientSender) -> ClientId {
        let id = Uuid::new_v4();
        let mut clients = self.clients();
        clients.insert(id, sender);
        log::debug!("client {} registered ({} connected)", id, clients.len());
        id
    }

    /// Creates the outbound queue for a new connection and registers it.
    pub fn register(&self) -> (ClientId, ClientReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.add(tx), rx)
    }

    /// Removes `id`. Returns the identifier if it was registered, `None`
    /// otherwise; removing twice is harmless.
    pub fn remove(&self, id: &ClientId) -> Option<ClientId> {
        let mut clients = self.clients();
        let removed = clients.remove(id).map(|_| *id);
        if removed.is_some() {
            log::debug!("client {} removed ({} connected)", id, clients.len());
        }
        removed
    }

    /// Hands `payload` to one connection.
    ///
    /// # Errors
    /// `UnknownSubscriber` if `id` is not registered. A registered connection
    /// that can no longer accept writes is logged, not reported.
    pub fn send_to(&self, id: &ClientId, payload: impl Into<Payload>) -> Result<()> {
        let clients = self.clients();
        let sender = clients.get(id).ok_or(TallyError::UnknownSubscriber(*id))?;

        if sender.send(payload.into()).is_err() {
            log::warn!("client {} is no longer reading, message dropped", id);
        }
        Ok(())
    }

    /// Hands `payload` to every registered connection not listed in `exclude`.
    /// Returns how many hand-offs succeeded.
    pub fn broadcast(&self, payload: impl Into<Payload>, exclude: &[ClientId]) -> usize {
        let payload = payload.into();
        let clients = self.clients();
        log::debug!("broadcasting to {} client(s)", clients.len().saturating_sub(exclude.len()));

        let mut delivered = 0;
        for (id, sender) in clients.iter().filter(|(id, _)| !exclude.contains(id)) {
            match sender.send(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(_) => log::warn!("client {} is no longer reading, broadcast skipped", id),
            }
        }
        delivered
    }

    /// True if `id` is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients().contains_key(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.clients().len()
    }

    /// True when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = registry.register();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&id));
        assert_eq!(registry.remove(&id), Some(id));
        assert_eq!(registry.remove(&id), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn identifiers_are_unique() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        assert_ne!(a, b);
    }

    #[test]
    fn send_to_unknown_is_reported() {
        let registry = ConnectionRegistry::new();
        let stranger = Uuid::new_v4();

        let err = registry.send_to(&stranger, "hello").unwrap_err();
        assert!(matches!(err, TallyError::UnknownSubscriber(id) if id == stranger));
    }

    #[test]
    fn send_to_delivers() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = registry.register();

        registry.send_to(&id, "hello").unwrap();
        assert_eq!(&*rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn broadcast_survives_a_dead_connection() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = registry.register();
        let (_b, rx_b) = registry.register();
        let (_c, mut rx_c) = registry.register();
        drop(rx_b);

        assert_eq!(registry.broadcast("tick", &[]), 2);
        assert_eq!(&*rx_a.try_recv().unwrap(), "tick");
        assert_eq!(&*rx_c.try_recv().unwrap(), "tick");
    }

    #[test]
    fn broadcast_honours_exclusions() {
        let registry = ConnectionRegistry::new();
        let (origin, mut rx_origin) = registry.register();
        let (_other, mut rx_other) = registry.register();

        assert_eq!(registry.broadcast("touch", &[origin]), 1);
        assert!(rx_origin.try_recv().is_err());
        assert_eq!(&*rx_other.try_recv().unwrap(), "touch");
    }
}
