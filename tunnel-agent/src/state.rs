//! Shared agent state: which local connections are live and where their
//! inbound (server→local) bytes should be routed.
//!
//! Mirrors the teacher's `data_channels` map in `AgentState`, keyed here by
//! `connection_id` directly since an agent only ever serves one tunnel id.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Bound on a single connection's inbound queue. Matches the relay's own
/// per-stream queue bound so a slow local service applies the same
/// backpressure the relay does.
pub const CONNECTION_QUEUE_CAPACITY: usize = 100;

#[derive(Clone, Default)]
pub struct AgentState {
    connections: Arc<DashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers a connection's inbound channel before the local dial
    /// even starts, so `Data` frames arriving during the dial are buffered
    /// rather than dropped.
    pub fn register(&self, connection_id: String) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE_CAPACITY);
        self.connections.insert(connection_id, tx);
        rx
    }

    /// Enqueues a chunk for an already-registered connection, blocking up
    /// to the queue's bound — the same natural backpressure the relay's
    /// own Stream Registry applies on the server side. A missing
    /// connection (already torn down) silently discards the chunk.
    pub async fn route(&self, connection_id: &str, chunk: Vec<u8>) {
        let sender = match self.connections.get(connection_id) {
            Some(sender) => sender.clone(),
            None => return,
        };
        let _ = sender.send(chunk).await;
    }

    pub fn remove(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }
}
