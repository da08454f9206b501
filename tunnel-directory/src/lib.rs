//! # Tunnel Directory
//!
//! The subdomain → tunnel id lookup the Proxy Engine consumes during
//! admission (spec §6.3). The core treats this as opaque; in the full
//! system this would be backed by the relational store that also owns user
//! registration and tunnel metadata CRUD (out of core scope per spec §1).
//! This crate supplies the trait plus an in-memory implementation so the
//! workspace is runnable end to end without that external service.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// Opaque identifier for a registered tunnel (§3 TunnelID).
pub type TunnelId = String;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory backend unavailable: {0}")]
    Unavailable(String),
}

/// `FindBySubdomain(subdomain) -> (tunnel_id, found) | error` (§6.3).
///
/// A hostile or failing directory is indistinguishable from a cold miss at
/// the call site by design (§9 open question) — callers collapse `Ok(None)`
/// and `Err(_)` to the same routing-miss behavior.
#[async_trait::async_trait]
pub trait TunnelDirectory: Send + Sync {
    async fn find_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<TunnelId>, DirectoryError>;
}

/// Lock-free in-memory directory, keyed by case-insensitive subdomain.
///
/// Grounded in the teacher's `DashMap`-backed registries (`state.rs`); the
/// persisted equivalent in the original system queried Postgres
/// (`postgres_tunnel_repo.go`'s `FindBySubdomain`), which is out of scope
/// here.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    by_subdomain: Arc<DashMap<String, TunnelId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the tunnel id bound to `subdomain`.
    pub fn bind(&self, subdomain: impl Into<String>, tunnel_id: impl Into<String>) {
        self.by_subdomain
            .insert(subdomain.into().to_ascii_lowercase(), tunnel_id.into());
    }

    /// Removes any binding for `subdomain`. Idempotent.
    pub fn unbind(&self, subdomain: &str) {
        self.by_subdomain.remove(&subdomain.to_ascii_lowercase());
    }
}

#[async_trait::async_trait]
impl TunnelDirectory for InMemoryDirectory {
    async fn find_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<TunnelId>, DirectoryError> {
        Ok(self
            .by_subdomain
            .get(&subdomain.to_ascii_lowercase())
            .map(|entry| entry.value().clone()))
    }
}
