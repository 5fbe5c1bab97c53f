//! Connection registry.
//!
//! Tracks connected WebSocket clients and the sessions each one started.
//! Every connection owns a cancellation token; each session gets a child of
//! it, so dropping the connection cancels all of its sessions.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier of a connected client.
pub type ConnectionId = Uuid;

/// Identifier of a single-code lineage or a batch started by a client.
pub type SessionId = Uuid;

#[derive(Debug)]
struct ConnectionEntry {
    cancel: CancellationToken,
    sessions: HashMap<SessionId, CancellationToken>,
}

/// Connection → live sessions mapping.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection.
    ///
    /// Returns its id and the token cancelled when it is unregistered.
    pub fn register(&self) -> (ConnectionId, CancellationToken) {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.connections.write().insert(
            id,
            ConnectionEntry {
                cancel: cancel.clone(),
                sessions: HashMap::new(),
            },
        );
        (id, cancel)
    }

    /// Remove a connection and cancel its sessions.
    ///
    /// Returns the number of sessions that were still live.
    pub fn unregister(&self, id: ConnectionId) -> usize {
        let Some(entry) = self.connections.write().remove(&id) else {
            return 0;
        };
        entry.cancel.cancel();
        entry.sessions.len()
    }

    /// Start tracking a session on `connection`.
    ///
    /// Returns `None` when the connection is gone.
    pub fn start_session(&self, connection: ConnectionId) -> Option<(SessionId, CancellationToken)> {
        let mut connections = self.connections.write();
        let entry = connections.get_mut(&connection)?;
        let id = Uuid::new_v4();
        let cancel = entry.cancel.child_token();
        entry.sessions.insert(id, cancel.clone());
        Some((id, cancel))
    }

    /// Stop tracking a finished session.
    pub fn finish_session(&self, connection: ConnectionId, session: SessionId) {
        if let Some(entry) = self.connections.write().get_mut(&connection) {
            entry.sessions.remove(&session);
        }
    }

    /// Number of connected clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of live sessions across all connections.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .map(|entry| entry.sessions.len())
            .sum()
    }

    /// Remove every connection and cancel all sessions.
    ///
    /// Returns the number of connections drained.
    pub fn drain(&self) -> usize {
        let drained: Vec<ConnectionEntry> = self
            .connections
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            entry.cancel.cancel();
        }
        drained.len()
    }
}
