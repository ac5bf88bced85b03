//! Process-local connection registry.
//!
//! One live connection per identity: registering overwrites any prior
//! entry for that identity. The registry is scoped to this process —
//! there is no cross-gateway fan-out.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{identity::Identity, websocket::types::ServerEvent};

pub type WsSender = mpsc::UnboundedSender<ServerEvent>;

/// Outcome of a fire-and-forget push to a connection.
///
/// `SendFailed` means the entry existed but its channel is closed —
/// the socket's tasks are tearing down and the entry has not been
/// removed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    NotConnected,
    SendFailed,
}

struct ClientConnection {
    conn_id: Uuid,
    tx: WsSender,
}

#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<DashMap<Identity, ClientConnection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for an identity, replacing any prior one.
    pub fn add_connection(&self, identity: Identity, conn_id: Uuid, tx: WsSender) {
        if let Some(previous) = self
            .connections
            .insert(identity.clone(), ClientConnection { conn_id, tx })
        {
            tracing::debug!(
                "Replaced connection {} for {} with {}",
                previous.conn_id,
                identity,
                conn_id
            );
        }
    }

    /// Remove the entry for `identity`, but only if it still belongs
    /// to the closing connection. A socket whose registration was
    /// overwritten must not evict its replacement on close.
    ///
    /// Returns whether an entry was removed.
    pub fn remove_connection(&self, identity: &Identity, conn_id: Uuid) -> bool {
        self.connections
            .remove_if(identity, |_, conn| conn.conn_id == conn_id)
            .is_some()
    }

    /// Push an event to the identity's live connection, if any.
    /// Never blocks; never fails the caller.
    pub fn send_to_user(&self, identity: &Identity, event: ServerEvent) -> SendOutcome {
        match self.connections.get(identity) {
            Some(conn) => {
                if conn.tx.send(event).is_ok() {
                    SendOutcome::Delivered
                } else {
                    SendOutcome::SendFailed
                }
            }
            None => SendOutcome::NotConnected,
        }
    }

    pub fn is_connected(&self, identity: &Identity) -> bool {
        self.connections.contains_key(identity)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::websocket::types::UnseenCountPayload;

    fn update(conversation_id: &str, count: i64) -> ServerEvent {
        ServerEvent::UnseenCountUpdate(UnseenCountPayload {
            conversation_id: conversation_id.to_string(),
            count,
        })
    }

    #[test]
    fn send_to_unregistered_identity_is_not_connected() {
        let manager = ConnectionManager::new();
        let seller = Identity::new(Role::Seller, "2");
        assert_eq!(
            manager.send_to_user(&seller, update("c1", 1)),
            SendOutcome::NotConnected
        );
    }

    #[test]
    fn registered_identity_receives_events() {
        let manager = ConnectionManager::new();
        let user = Identity::new(Role::User, "1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.add_connection(user.clone(), Uuid::new_v4(), tx);

        assert_eq!(
            manager.send_to_user(&user, update("c1", 1)),
            SendOutcome::Delivered
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::UnseenCountUpdate(_)
        ));
    }

    #[test]
    fn registration_overwrites_prior_connection() {
        let manager = ConnectionManager::new();
        let user = Identity::new(Role::User, "1");

        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        manager.add_connection(user.clone(), Uuid::new_v4(), old_tx);
        manager.add_connection(user.clone(), Uuid::new_v4(), new_tx);

        assert_eq!(manager.connection_count(), 1);
        manager.send_to_user(&user, update("c1", 1));
        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());
    }

    #[test]
    fn stale_close_does_not_evict_replacement() {
        let manager = ConnectionManager::new();
        let user = Identity::new(Role::User, "1");
        let old_conn = Uuid::new_v4();
        let new_conn = Uuid::new_v4();

        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();
        manager.add_connection(user.clone(), old_conn, old_tx);
        manager.add_connection(user.clone(), new_conn, new_tx);

        // The overwritten socket closes late; the live entry stays.
        assert!(!manager.remove_connection(&user, old_conn));
        assert!(manager.is_connected(&user));

        assert!(manager.remove_connection(&user, new_conn));
        assert!(!manager.is_connected(&user));
    }

    #[test]
    fn send_to_dropped_receiver_is_send_failed() {
        let manager = ConnectionManager::new();
        let user = Identity::new(Role::User, "1");
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        manager.add_connection(user.clone(), Uuid::new_v4(), tx);

        assert_eq!(
            manager.send_to_user(&user, update("c1", 1)),
            SendOutcome::SendFailed
        );
    }
}
