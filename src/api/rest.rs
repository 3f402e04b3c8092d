//! REST backend for the history/send collaborators
//!
//! Wraps reqwest::Client with the backend's chat routes. History endpoints
//! may return either a bare array or a `{data: [...]}` wrapper; both are
//! accepted. Direct-message history occasionally carries stray group rows;
//! those are dropped before mapping.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{AttachmentResolver, HistorySource, SendSource};
use crate::codec::{last_segment, Codec, Scope, WireMessage};
use crate::models::{Conversation, ConversationKind, Draft, Message};

/// Send request body for a direct message.
#[derive(Debug, Serialize)]
struct SendDirectBody<'a> {
    user_id: &'a str,
    receiver_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_type: Option<&'a str>,
}

/// Send request body for a group message.
#[derive(Debug, Serialize)]
struct SendGroupBody<'a> {
    user_id: &'a str,
    group_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_type: Option<&'a str>,
}

/// History responses come either bare or wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryResponse {
    List(Vec<WireMessage>),
    Wrapped { data: Option<Vec<WireMessage>> },
}

impl HistoryResponse {
    fn into_list(self) -> Vec<WireMessage> {
        match self {
            HistoryResponse::List(list) => list,
            HistoryResponse::Wrapped { data } => data.unwrap_or_default(),
        }
    }
}

/// Builds view URLs under the API origin (`/file_url/view/{name}`).
pub struct ViewUrlResolver {
    base_url: String,
}

impl AttachmentResolver for ViewUrlResolver {
    fn view_url(&self, stored_name: &str) -> String {
        format!("{}/file_url/view/{}", self.base_url, last_segment(stored_name))
    }
}

/// Authenticated REST client for the chat backend.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    local_user_id: String,
    resolver: Arc<ViewUrlResolver>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, local_user_id: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let resolver = Arc::new(ViewUrlResolver {
            base_url: base_url.clone(),
        });
        Self {
            http: reqwest::Client::new(),
            base_url,
            auth_token: None,
            local_user_id: local_user_id.into(),
            resolver,
        }
    }

    /// Attach a bearer token to every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn resolver(&self) -> Arc<ViewUrlResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    fn codec_for(&self, conversation: &Conversation) -> Codec {
        let scope = match conversation.kind {
            ConversationKind::Direct => Scope::Direct {
                peer_id: conversation.id.clone(),
            },
            ConversationKind::Group => Scope::Group {
                group_id: conversation.id.clone(),
            },
        };
        Codec::new(self.local_user_id.clone(), scope, self.resolver())
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {}", url);

        let mut req = self.http.get(&url);
        if let Some(ref token) = self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        check_response(resp, &url).await
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", url);

        let mut req = self.http.post(&url).json(body);
        if let Some(ref token) = self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        check_response(resp, &url).await
    }
}

#[async_trait]
impl HistorySource for RestClient {
    async fn fetch_history(
        &self,
        conversation: &Conversation,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let path = match conversation.kind {
            ConversationKind::Direct => format!(
                "/chat/direct/{}?limit={}&offset={}",
                conversation.id, limit, offset
            ),
            ConversationKind::Group => format!(
                "/chat/groups/{}/messages?limit={}&offset={}",
                conversation.id, limit, offset
            ),
        };

        let resp = self.get(&path).await?;
        let body: HistoryResponse = resp
            .json()
            .await
            .context("Failed to parse history response")?;

        // The codec drops rows of the wrong class (e.g. stray group rows in
        // direct history) along with anything for another conversation.
        let codec = self.codec_for(conversation);
        Ok(body
            .into_list()
            .iter()
            .filter_map(|wire| codec.decode(wire))
            .collect())
    }
}

#[async_trait]
impl SendSource for RestClient {
    async fn send_message(&self, conversation: &Conversation, draft: &Draft) -> Result<Message> {
        let resp = match conversation.kind {
            ConversationKind::Direct => {
                let body = SendDirectBody {
                    user_id: &self.local_user_id,
                    receiver_id: &conversation.id,
                    content: draft.content.as_deref(),
                    file_url: draft.file_url.as_deref(),
                    file_name: draft.file_name.as_deref(),
                    file_type: draft.file_type.as_deref(),
                };
                self.post_json("/chat/messages", &body).await?
            }
            ConversationKind::Group => {
                let body = SendGroupBody {
                    user_id: &self.local_user_id,
                    group_id: &conversation.id,
                    content: draft.content.as_deref(),
                    file_url: draft.file_url.as_deref(),
                    file_name: draft.file_name.as_deref(),
                    file_type: draft.file_type.as_deref(),
                };
                self.post_json("/chat/groups/messages", &body).await?
            }
        };

        let wire: WireMessage = resp.json().await.context("Failed to parse send response")?;
        match self.codec_for(conversation).decode(&wire) {
            Some(message) => Ok(message),
            None => bail!(
                "send acknowledgment did not match conversation {}",
                conversation.id
            ),
        }
    }
}

/// Check HTTP response status and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!("401 Unauthorized for {} -- token may be invalid or expired", url);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
