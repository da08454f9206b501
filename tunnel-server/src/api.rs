//! Minimal admin surface: a liveness probe and a read-only view of which
//! tunnels currently have a live agent session, in the spirit of the
//! teacher's `GET /api/agents`.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AdminState;

#[derive(Serialize)]
pub struct SessionListItem {
    pub tunnel_id: String,
}

/// `GET /healthz` — liveness probe for the admin API itself.
pub async fn healthz() -> &'static str {
    "ok"
}

/// `GET /api/sessions` — lists every tunnel id with a currently registered
/// control-channel session.
pub async fn list_sessions(State(state): State<AdminState>) -> Json<Vec<SessionListItem>> {
    let sessions = state
        .sessions
        .tunnel_ids()
        .into_iter()
        .map(|tunnel_id| SessionListItem { tunnel_id })
        .collect();
    Json(sessions)
}
