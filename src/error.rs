//! Error taxonomy for the session surface
//!
//! Everything below this surface uses `anyhow` with context; nothing in the
//! core is fatal to the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// History fetch failed while opening a conversation. The session stays
    /// idle with an empty timeline; retrying is the caller's call.
    #[error("history load for {conversation} failed: {cause:#}")]
    HistoryLoad {
        conversation: String,
        cause: anyhow::Error,
    },

    /// Operation requires a live conversation and none is open.
    #[error("no active conversation")]
    NotLive,
}
