//! Conversation session controller
//!
//! Binds one transport channel and one reconciliation store to the active
//! conversation. Opening a conversation tears down whatever was live before
//! it -- there is never more than one channel/store pair, so a fast
//! navigation sequence cannot leak sockets. All store mutations funnel
//! through one mutex; spawned round trips capture the store of the
//! conversation they were issued for, so completions that land after a
//! switch only ever touch the discarded store.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::api::{AttachmentResolver, HistorySource, SendSource};
use crate::codec::{Codec, Scope};
use crate::error::SessionError;
use crate::models::{Conversation, ConversationKind, Draft, Message};
use crate::store::Timeline;
use crate::transport::{Channel, ChannelEvent, Connector, Endpoint};

/// History page sizes the original client requests on open.
const DIRECT_HISTORY_LIMIT: usize = 200;
const GROUP_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No conversation active.
    Idle,
    /// History fetch in flight.
    Loading,
    /// History loaded, channel open, store accepting both paths.
    Live,
}

/// Notifications for the rendering layer.
#[derive(Debug)]
pub enum SessionEvent {
    /// The timeline mutated; re-read it via [`SessionController::timeline`].
    TimelineChanged,
    /// A confirmed send failed and its optimistic entry was rolled back.
    /// Surfaced out-of-band (e.g. a toast); the session stays live.
    SendFailed { local_id: String, error: String },
}

struct Active {
    conversation: Conversation,
    timeline: Arc<Mutex<Timeline>>,
    channel: Channel,
}

pub struct SessionController {
    local_user_id: String,
    history: Arc<dyn HistorySource>,
    sender: Arc<dyn SendSource>,
    resolver: Arc<dyn AttachmentResolver>,
    connector: Arc<dyn Connector>,
    updates: mpsc::UnboundedSender<SessionEvent>,
    state: SessionState,
    active: Option<Active>,
}

/// Lock the timeline, recovering from poisoning (mutations never panic
/// mid-write in practice, and a stale timeline beats a crashed one).
fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionController {
    /// Build a controller. Returns the handle plus the receiver for
    /// [`SessionEvent`] notifications.
    pub fn new(
        local_user_id: impl Into<String>,
        history: Arc<dyn HistorySource>,
        sender: Arc<dyn SendSource>,
        resolver: Arc<dyn AttachmentResolver>,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        (
            Self {
                local_user_id: local_user_id.into(),
                history,
                sender,
                resolver,
                connector,
                updates,
                state: SessionState::Idle,
                active: None,
            },
            updates_rx,
        )
    }

    /// Controller backed by a [`crate::api::RestClient`] for both history
    /// and sends.
    pub fn with_rest(
        client: Arc<crate::api::RestClient>,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let resolver = client.resolver();
        Self::new(
            client.local_user_id().to_string(),
            Arc::clone(&client) as Arc<dyn HistorySource>,
            client as Arc<dyn SendSource>,
            resolver,
            connector,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.conversation.id.as_str())
    }

    /// Snapshot of the active timeline, in display order. Empty when idle.
    pub fn timeline(&self) -> Vec<Message> {
        match &self.active {
            Some(active) => lock(&active.timeline).messages().to_vec(),
            None => Vec::new(),
        }
    }

    /// Activate a conversation: tear down the previous one unconditionally,
    /// fetch history, then stand up the store and push channel.
    ///
    /// On history failure the session is left idle with an empty timeline;
    /// retrying the open is the caller's responsibility (separate from the
    /// channel's own socket backoff).
    pub async fn open(&mut self, conversation: Conversation) -> Result<(), SessionError> {
        self.close();
        self.state = SessionState::Loading;

        let limit = match conversation.kind {
            ConversationKind::Direct => DIRECT_HISTORY_LIMIT,
            ConversationKind::Group => GROUP_HISTORY_LIMIT,
        };
        let history = match self.history.fetch_history(&conversation, limit, 0).await {
            Ok(history) => history,
            Err(cause) => {
                self.state = SessionState::Idle;
                return Err(SessionError::HistoryLoad {
                    conversation: conversation.id,
                    cause,
                });
            }
        };

        let mut timeline = Timeline::new(conversation.id.clone());
        timeline.load_history(history);
        let timeline = Arc::new(Mutex::new(timeline));

        let (endpoint, scope) = match conversation.kind {
            ConversationKind::Direct => (
                Endpoint::Direct {
                    user_id: self.local_user_id.clone(),
                },
                Scope::Direct {
                    peer_id: conversation.id.clone(),
                },
            ),
            ConversationKind::Group => (
                Endpoint::Group {
                    group_id: conversation.id.clone(),
                    user_id: self.local_user_id.clone(),
                },
                Scope::Group {
                    group_id: conversation.id.clone(),
                },
            ),
        };
        let codec = Codec::new(
            self.local_user_id.clone(),
            scope,
            Arc::clone(&self.resolver),
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = Channel::open(Arc::clone(&self.connector), endpoint, events_tx);
        tokio::spawn(pump_frames(
            events_rx,
            codec,
            Arc::clone(&timeline),
            self.updates.clone(),
        ));

        tracing::info!("conversation {} live", conversation.id);
        self.active = Some(Active {
            conversation,
            timeline,
            channel,
        });
        self.state = SessionState::Live;
        let _ = self.updates.send(SessionEvent::TimelineChanged);
        Ok(())
    }

    /// Optimistically append `draft` and kick off the confirmed send.
    ///
    /// Returns the provisional local id immediately; the round trip settles
    /// into `confirm_send`/`fail_send` on the store this send was issued
    /// against, whichever conversation is active by then.
    pub fn send(&mut self, draft: Draft) -> Result<String, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotLive)?;

        let local_id = lock(&active.timeline).append_local_pending(&draft, &self.local_user_id);
        let _ = self.updates.send(SessionEvent::TimelineChanged);

        let sender = Arc::clone(&self.sender);
        let timeline = Arc::clone(&active.timeline);
        let conversation = active.conversation.clone();
        let updates = self.updates.clone();
        let task_local_id = local_id.clone();
        tokio::spawn(async move {
            match sender.send_message(&conversation, &draft).await {
                Ok(confirmed) => {
                    lock(&timeline).confirm_send(&task_local_id, confirmed);
                    let _ = updates.send(SessionEvent::TimelineChanged);
                }
                Err(e) => {
                    tracing::warn!("send to {} failed: {:#}", conversation.id, e);
                    lock(&timeline).fail_send(&task_local_id);
                    let _ = updates.send(SessionEvent::TimelineChanged);
                    let _ = updates.send(SessionEvent::SendFailed {
                        local_id: task_local_id,
                        error: format!("{:#}", e),
                    });
                }
            }
        });

        Ok(local_id)
    }

    /// Deactivate the current conversation: close the channel (suppressing
    /// reconnects) and discard the store. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!("closing conversation {}", active.conversation.id);
            active.channel.close();
            // the frame pump exits on its own once the channel task emits
            // Closed and drops the event sender
        }
        self.state = SessionState::Idle;
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}

/// Route channel events into the store for one conversation's lifetime.
async fn pump_frames(
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    codec: Codec,
    timeline: Arc<Mutex<Timeline>>,
    updates: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Frame(value) => {
                if let Some(message) = codec.decode_frame(&value) {
                    lock(&timeline).admit_pushed(message);
                    let _ = updates.send(SessionEvent::TimelineChanged);
                }
            }
            ChannelEvent::Open => {
                tracing::debug!("push channel open for {}", lock(&timeline).conversation_id());
            }
            ChannelEvent::Error(e) => {
                tracing::debug!("push channel error (will retry): {}", e);
            }
            ChannelEvent::Closed => break,
        }
    }
}
