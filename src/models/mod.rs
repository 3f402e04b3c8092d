//! Data models for the synchronization core

pub mod message;

pub use message::{
    Attachment, Conversation, ConversationKind, DeliveryState, Draft, Kind, Message,
    LOCAL_ID_PREFIX,
};
