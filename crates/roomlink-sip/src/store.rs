//! Call session store.
//!
//! Two indexes for fast lookups:
//! - `sessions`: client id → session
//! - `by_peer`: peer URI → client id (one live call per peer)
//!
//! Plain synchronous map; the manager wraps it in its state mutex.

use std::collections::HashMap;

use roomlink_common::{ClientId, GatewayError, GatewayResult};

use crate::session::CallSession;

#[derive(Debug, Default)]
pub struct CallSessionStore {
    sessions: HashMap<ClientId, CallSession>,
    by_peer: HashMap<String, ClientId>,
}

impl CallSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Fails if its id or its peer is already present.
    pub fn insert(&mut self, session: CallSession) -> GatewayResult<()> {
        if self.by_peer.contains_key(&session.peer_uri) || self.sessions.contains_key(&session.id) {
            return Err(GatewayError::DuplicatePeer(session.peer_uri));
        }
        self.by_peer.insert(session.peer_uri.clone(), session.id.clone());
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn get(&self, id: &ClientId) -> Option<&CallSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut CallSession> {
        self.sessions.get_mut(id)
    }

    pub fn id_for_peer(&self, peer_uri: &str) -> Option<ClientId> {
        self.by_peer.get(peer_uri).cloned()
    }

    pub fn contains_peer(&self, peer_uri: &str) -> bool {
        self.by_peer.contains_key(peer_uri)
    }

    pub fn remove(&mut self, id: &ClientId) -> Option<CallSession> {
        let session = self.sessions.remove(id)?;
        self.by_peer.remove(&session.peer_uri);
        Some(session)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.sessions.keys().cloned().collect()
    }

    /// Ids of sessions bound to a controller matching `pred`.
    pub fn ids_by_controller(&self, pred: impl Fn(&str) -> bool) -> Vec<ClientId> {
        self.sessions
            .values()
            .filter(|s| pred(s.controller()))
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &CallSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
