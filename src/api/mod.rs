//! Boundary contracts to the out-of-scope collaborators (history source,
//! send source, attachment resolver) and a reqwest-based default backend.

pub mod rest;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Conversation, Draft, Message};

pub use rest::{RestClient, ViewUrlResolver};

/// Message-history collaborator, consulted once per conversation open.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Ordered (oldest-first) page of the conversation's history.
    async fn fetch_history(
        &self,
        conversation: &Conversation,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>>;
}

/// Confirmed-send collaborator: request/response with the backend of record.
#[async_trait]
pub trait SendSource: Send + Sync {
    /// Submit a draft; resolves with the confirmed message carrying its
    /// server-assigned id.
    async fn send_message(&self, conversation: &Conversation, draft: &Draft) -> Result<Message>;
}

/// Resolves a stored file reference to a retrievable URL.
pub trait AttachmentResolver: Send + Sync {
    fn view_url(&self, stored_name: &str) -> String;
}
