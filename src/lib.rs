//! chatsync -- real-time message synchronization core for a team chat client
//!
//! Keeps a per-conversation message timeline consistent while messages arrive
//! from two independent, unordered, partially-overlapping sources: the
//! synchronous send acknowledgment and the asynchronous push over a
//! persistent WebSocket. The socket self-heals; duplicates are suppressed by
//! server-id identity; optimistic local echoes are reconciled in place or
//! rolled back.
//!
//! Layering, leaves first:
//! - [`transport`]: one WebSocket channel per subscription, with exponential
//!   backoff reconnect.
//! - [`codec`]: wire envelope/payload to [`models::Message`], kind
//!   classification, cross-talk safety filter.
//! - [`store`]: the reconciliation timeline (ordered entries + seen-id set).
//! - [`session`]: binds a channel and a store to the active conversation.
//! - [`api`]: boundary traits for the out-of-scope collaborators, plus a
//!   reqwest-backed default.

pub mod api;
pub mod codec;
pub mod error;
pub mod models;
pub mod session;
pub mod store;
pub mod transport;

pub use api::{AttachmentResolver, HistorySource, RestClient, SendSource};
pub use error::SessionError;
pub use models::{
    Attachment, Conversation, ConversationKind, DeliveryState, Draft, Kind, Message,
};
pub use session::{SessionController, SessionEvent, SessionState};
pub use store::Timeline;
pub use transport::{Channel, ChannelEvent, Connector, Endpoint, WsConnector};
