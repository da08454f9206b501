//! Shared state for the admin HTTP API.
//!
//! Unlike the teacher's `AppState`, the registries of record live in
//! `tunnel-core`; this just bundles the handles the admin routes need to
//! read them.

use tunnel_core::SessionRegistry;

#[derive(Clone)]
pub struct AdminState {
    pub sessions: SessionRegistry,
}
