//! Wire codec: translates chat events between the wire representation and
//! the internal [`Message`] record.
//!
//! The push socket multiplexes several notification kinds; only the two chat
//! event types are decoded here, everything else is ignored. The codec also
//! enforces the cross-talk safety filter: a payload that structurally belongs
//! to a different conversation class (or a different conversation) than the
//! active subscription is rejected before it can reach the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AttachmentResolver;
use crate::models::{Attachment, DeliveryState, Kind, Message};

/// Envelope `type` for a direct chat event.
pub const DIRECT_MESSAGE_TYPE: &str = "direct_message";
/// Envelope `type` for a group chat event.
pub const GROUP_MESSAGE_TYPE: &str = "group_message";

/// Outer frame shape: `{type, payload}`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Chat event as the backend serializes it (push payloads and REST bodies
/// share this shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Conversation class the codec is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Direct thread with one peer. The direct socket is keyed by the local
    /// user and carries every peer's traffic, so the peer id is needed to
    /// filter events for the active conversation.
    Direct { peer_id: String },
    Group { group_id: String },
}

/// Classify the payload kind from attachment metadata.
///
/// `Image` iff an attachment is present and its media type starts with
/// `image/`; `File` for any other attachment; `Text` otherwise.
pub fn classify_kind(mime: Option<&str>, has_attachment: bool) -> Kind {
    if !has_attachment {
        return Kind::Text;
    }
    match mime {
        Some(m) if m.starts_with("image/") => Kind::Image,
        _ => Kind::File,
    }
}

/// Last path segment of a stored file reference (handles both `/` and `\`).
pub fn last_segment(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Decoder for one subscription scope.
pub struct Codec {
    local_user_id: String,
    scope: Scope,
    resolver: Arc<dyn AttachmentResolver>,
}

impl Codec {
    pub fn new(
        local_user_id: impl Into<String>,
        scope: Scope,
        resolver: Arc<dyn AttachmentResolver>,
    ) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            scope,
            resolver,
        }
    }

    /// Decode an enveloped push frame.
    ///
    /// Returns `None` for unrecognized envelope types, class mismatches, and
    /// payloads for other conversations -- all silently dropped by contract.
    pub fn decode_frame(&self, frame: &serde_json::Value) -> Option<Message> {
        let envelope: Envelope = serde_json::from_value(frame.clone()).ok()?;

        let class_ok = matches!(
            (envelope.kind.as_str(), &self.scope),
            (DIRECT_MESSAGE_TYPE, Scope::Direct { .. }) | (GROUP_MESSAGE_TYPE, Scope::Group { .. })
        );
        if !class_ok {
            tracing::debug!("ignoring frame of type {:?}", envelope.kind);
            return None;
        }

        let wire: WireMessage = serde_json::from_value(envelope.payload?).ok()?;
        self.decode(&wire)
    }

    /// Decode a bare wire message (history rows and send acknowledgments use
    /// this path directly, without the envelope).
    pub fn decode(&self, wire: &WireMessage) -> Option<Message> {
        let conversation_id = match &self.scope {
            Scope::Direct { peer_id } => {
                // A group-scoped payload on a direct subscription is
                // cross-talk from the shared transport; reject it.
                if wire.group_id.is_some() {
                    tracing::debug!("dropping group payload on direct scope");
                    return None;
                }
                // The conversation is identified by the other party,
                // whichever direction the message travelled.
                let other = if wire.sender_id == self.local_user_id {
                    wire.receiver_id.as_deref()?
                } else {
                    wire.sender_id.as_str()
                };
                if other != peer_id {
                    return None;
                }
                other.to_string()
            }
            Scope::Group { group_id } => {
                let gid = wire.group_id.as_deref()?;
                if gid != group_id {
                    return None;
                }
                gid.to_string()
            }
        };

        let attachment = wire.file_url.as_deref().map(|file_url| {
            let stored = last_segment(file_url);
            Attachment {
                url: self.resolver.view_url(stored),
                display_name: wire
                    .file_name
                    .clone()
                    .unwrap_or_else(|| stored.to_string()),
            }
        });

        Some(Message {
            id: wire.id.clone(),
            conversation_id,
            sender_id: wire.sender_id.clone(),
            content: wire.content.clone(),
            kind: classify_kind(wire.file_type.as_deref(), attachment.is_some()),
            attachment,
            created_at: wire.timestamp.unwrap_or_else(Utc::now),
            delivery_state: DeliveryState::Confirmed,
        })
    }
}
