//! Message timeline records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix reserved for locally-assigned provisional message ids.
///
/// Server ids never carry this prefix, so a pending local echo is always
/// distinguishable from a confirmed message.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Payload kind, derived from attachment metadata (never user-supplied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Text,
    Image,
    File,
}

/// Delivery state of a timeline entry.
///
/// `Pending` only ever applies to locally-originated messages awaiting the
/// send acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

/// Resolved file attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Retrievable URL (already passed through the attachment resolver).
    pub url: String,
    /// Name to show next to the attachment.
    pub display_name: String,
}

/// One entry in a conversation timeline. Immutable once confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Direct peer's user id, or the group id.
    pub conversation_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub kind: Kind,
    pub attachment: Option<Attachment>,
    /// Display only -- never used as ordering authority.
    pub created_at: DateTime<Utc>,
    pub delivery_state: DeliveryState,
}

impl Message {
    /// Whether this entry still carries a provisional local id.
    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

/// Outbound message before any id has been assigned.
///
/// File fields reference an already-uploaded blob (upload itself is handled
/// by an external collaborator); they mirror the send request body.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
}

impl Draft {
    /// Plain text draft.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// Conversation class: direct peer thread or group thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Identity of one conversation as the session controller sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Direct peer's user id, or the group id.
    pub id: String,
    pub kind: ConversationKind,
}

impl Conversation {
    pub fn direct(peer_id: impl Into<String>) -> Self {
        Self {
            id: peer_id.into(),
            kind: ConversationKind::Direct,
        }
    }

    pub fn group(group_id: impl Into<String>) -> Self {
        Self {
            id: group_id.into(),
            kind: ConversationKind::Group,
        }
    }
}
