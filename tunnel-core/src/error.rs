use thiserror::Error;

/// Errors surfaced by the core data plane. Most admission-time failures
/// (routing miss, dead session) are deliberately *not* errors — per §7 they
/// are silent connection drops, not propagated `Result`s — so this enum is
/// small and only covers conditions a caller must react to.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed HTTP request prefix: {0}")]
    MalformedRequest(String),
}
