//! # Session Registry (§3 Session, §4.1)
//!
//! A process-wide mapping from [`TunnelId`] to the live control-channel
//! handle of its connected agent. Backed by [`DashMap`], the same choice the
//! teacher repository makes for its agent/connection/session registries —
//! readers dominate and `DashMap`'s sharded locking favors exactly that.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use tunnel_protocol::ServerToClient;

pub type TunnelId = String;

/// Handle to a live control channel. Cloning is cheap (it's a channel
/// sender); every clone pushes `ServerToClient` frames to the same agent.
///
/// `session_id` disambiguates *this* registration from a later one that
/// replaced it under the same tunnel id (§9 duplicate registration is
/// last-writer-wins) — without it, a displaced agent's deferred cleanup
/// could race and evict the session that replaced it.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub tunnel_id: TunnelId,
    tx: mpsc::Sender<ServerToClient>,
}

impl SessionHandle {
    pub fn new(tunnel_id: TunnelId, tx: mpsc::Sender<ServerToClient>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tunnel_id,
            tx,
        }
    }

    /// Sends a frame toward the agent. Fails if the control channel has
    /// already closed; callers treat that the same as any other send
    /// failure during admission (§4.3 step 6: drop the connection).
    pub async fn send(&self, frame: ServerToClient) -> Result<(), mpsc::error::SendError<ServerToClient>> {
        self.tx.send(frame).await
    }
}

/// §4.1 Session Registry.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<TunnelId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handle` to `tunnel_id`. No uniqueness guarantee across calls —
    /// the reference policy (and the one implemented here) is last-writer-
    /// wins: a second registration silently replaces the first without
    /// notifying the displaced agent (§9).
    pub fn add(&self, handle: SessionHandle) {
        self.sessions.insert(handle.tunnel_id.clone(), handle);
    }

    /// O(1) lookup.
    pub fn get(&self, tunnel_id: &str) -> Option<SessionHandle> {
        self.sessions.get(tunnel_id).map(|entry| entry.value().clone())
    }

    /// Idempotent unbind. Only removes the entry if it still belongs to
    /// `session_id` — a displaced registration's deferred cleanup must not
    /// evict the session that replaced it.
    pub fn remove(&self, tunnel_id: &str, session_id: Uuid) {
        self.sessions
            .remove_if(tunnel_id, |_, handle| handle.session_id == session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of currently bound tunnel ids, for the admin surface.
    pub fn tunnel_ids(&self) -> Vec<TunnelId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(tunnel_id: &str) -> (SessionHandle, mpsc::Receiver<ServerToClient>) {
        let (tx, rx) = mpsc::channel(8);
        (SessionHandle::new(tunnel_id.to_string(), tx), rx)
    }

    #[test]
    fn get_on_empty_registry_misses() {
        let reg = SessionRegistry::new();
        assert!(reg.get("T1").is_none());
    }

    #[test]
    fn add_then_get_round_trips() {
        let reg = SessionRegistry::new();
        let (h, _rx) = handle("T1");
        let id = h.session_id;
        reg.add(h);
        let found = reg.get("T1").unwrap();
        assert_eq!(found.session_id, id);
    }

    #[test]
    fn second_registration_replaces_the_first() {
        let reg = SessionRegistry::new();
        let (h1, _rx1) = handle("T1");
        let (h2, _rx2) = handle("T1");
        let id2 = h2.session_id;
        reg.add(h1);
        reg.add(h2);
        assert_eq!(reg.get("T1").unwrap().session_id, id2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn stale_remove_does_not_evict_the_replacement() {
        let reg = SessionRegistry::new();
        let (h1, _rx1) = handle("T1");
        let stale_id = h1.session_id;
        let (h2, _rx2) = handle("T1");
        let id2 = h2.session_id;
        reg.add(h1);
        reg.add(h2);

        // Displaced agent's deferred cleanup fires after the replacement.
        reg.remove("T1", stale_id);

        assert_eq!(reg.get("T1").unwrap().session_id, id2);
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = SessionRegistry::new();
        let (h, _rx) = handle("T1");
        let id = h.session_id;
        reg.add(h);
        reg.remove("T1", id);
        reg.remove("T1", id);
        assert!(reg.get("T1").is_none());
    }
}
