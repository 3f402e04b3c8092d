//! Reconciliation store: the authoritative in-memory timeline for one open
//! conversation.
//!
//! Messages reach the timeline over three paths that race by design: the
//! optimistic local echo, the send acknowledgment, and the socket push.
//! The merge rules here make every interleaving converge to the same final
//! timeline, keyed exclusively on server-assigned message ids -- there is
//! deliberately no content or timestamp correlation, because the id is the
//! only collision-free key.

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::codec::classify_kind;
use crate::models::{Attachment, DeliveryState, Draft, Message, LOCAL_ID_PREFIX};

/// Ordered timeline plus the seen-id set, kept in lockstep.
///
/// Ordering invariant: local send order interleaved with push arrival order;
/// a confirmed send never moves from the position it held while pending.
#[derive(Debug)]
pub struct Timeline {
    conversation_id: String,
    entries: Vec<Message>,
    /// Server ids already admitted. Local provisional ids never enter here.
    seen: HashSet<String>,
}

impl Timeline {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Replace the timeline wholesale with fetched history.
    ///
    /// Repeated ids in the source keep their first occurrence; relative order
    /// of retained entries is preserved.
    pub fn load_history(&mut self, history: Vec<Message>) {
        self.entries.clear();
        self.seen.clear();
        for message in history {
            if self.seen.insert(message.id.clone()) {
                self.entries.push(message);
            }
        }
    }

    /// Append an optimistic local echo and return its provisional id.
    ///
    /// Synchronous: the caller reflects the send instantly, before any
    /// network round trip completes.
    pub fn append_local_pending(&mut self, draft: &Draft, sender_id: &str) -> String {
        let local_id = format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4());
        let attachment = draft.file_url.as_deref().map(|url| Attachment {
            url: url.to_string(),
            display_name: draft
                .file_name
                .clone()
                .unwrap_or_else(|| crate::codec::last_segment(url).to_string()),
        });
        self.entries.push(Message {
            id: local_id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender_id: sender_id.to_string(),
            content: draft.content.clone(),
            kind: classify_kind(draft.file_type.as_deref(), attachment.is_some()),
            attachment,
            created_at: Utc::now(),
            delivery_state: DeliveryState::Pending,
        });
        local_id
    }

    /// Apply the authoritative send acknowledgment for `local_id`.
    ///
    /// If the push path already admitted the confirmed id, the pending entry
    /// is removed and the pushed copy stays as the single source of truth.
    /// Otherwise the pending entry is replaced in place, preserving send
    /// order. Either arrival order converges to the same timeline.
    pub fn confirm_send(&mut self, local_id: &str, confirmed: Message) {
        if self.seen.contains(&confirmed.id) {
            self.entries.retain(|m| m.id != local_id);
            return;
        }
        self.seen.insert(confirmed.id.clone());
        let confirmed = Message {
            delivery_state: DeliveryState::Confirmed,
            ..confirmed
        };
        match self.entries.iter_mut().find(|m| m.id == local_id) {
            Some(slot) => *slot = confirmed,
            // Placeholder already gone (failed or cleared mid-flight); keep
            // the acknowledged message rather than losing it.
            None => self.entries.push(confirmed),
        }
    }

    /// Roll back a failed optimistic send. The caller surfaces the failure
    /// through a side channel; no error bubble remains in the timeline.
    pub fn fail_send(&mut self, local_id: &str) {
        self.entries.retain(|m| m.id != local_id);
    }

    /// Admit a message delivered over the push channel. Idempotent: an id
    /// already admitted (by an earlier push or by the send acknowledgment)
    /// is a no-op.
    pub fn admit_pushed(&mut self, message: Message) {
        if !self.seen.insert(message.id.clone()) {
            return;
        }
        self.entries.push(Message {
            delivery_state: DeliveryState::Confirmed,
            ..message
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Kind;

    fn confirmed(id: &str, content: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "me".into(),
            content: Some(content.into()),
            kind: Kind::Text,
            attachment: None,
            created_at: Utc::now(),
            delivery_state: DeliveryState::Confirmed,
        }
    }

    fn ids(timeline: &Timeline) -> Vec<&str> {
        timeline.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_local_pending_is_instant_and_prefixed() {
        let mut t = Timeline::new("c1");
        let local_id = t.append_local_pending(&Draft::text("hi"), "me");
        assert!(local_id.starts_with(LOCAL_ID_PREFIX));
        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].delivery_state, DeliveryState::Pending);
        assert!(t.messages()[0].is_local());
    }

    #[test]
    fn test_confirm_before_push() {
        // Scenario: ack arrives first, then the push for the same id.
        let mut t = Timeline::new("c1");
        let local_id = t.append_local_pending(&Draft::text("hi"), "me");
        t.confirm_send(&local_id, confirmed("s1", "hi"));
        t.admit_pushed(confirmed("s1", "hi"));
        assert_eq!(ids(&t), vec!["s1"]);
        assert_eq!(t.messages()[0].delivery_state, DeliveryState::Confirmed);
    }

    #[test]
    fn test_push_before_confirm() {
        // Scenario: push wins the race; ack must drop the placeholder.
        let mut t = Timeline::new("c1");
        let local_id = t.append_local_pending(&Draft::text("hi"), "me");
        t.admit_pushed(confirmed("s1", "hi"));
        assert_eq!(ids(&t), vec![local_id.as_str(), "s1"]);
        t.confirm_send(&local_id, confirmed("s1", "hi"));
        assert_eq!(ids(&t), vec!["s1"]);
    }

    #[test]
    fn test_order_preserved_across_confirmation_order() {
        // Sends issued A then B; confirmations arrive B then A.
        let mut t = Timeline::new("c1");
        let a = t.append_local_pending(&Draft::text("A"), "me");
        let b = t.append_local_pending(&Draft::text("B"), "me");
        t.confirm_send(&b, confirmed("sB", "B"));
        t.confirm_send(&a, confirmed("sA", "A"));
        assert_eq!(ids(&t), vec!["sA", "sB"]);
    }

    #[test]
    fn test_admit_pushed_idempotent() {
        let mut t = Timeline::new("c1");
        for _ in 0..3 {
            t.admit_pushed(confirmed("s1", "hi"));
        }
        assert_eq!(ids(&t), vec!["s1"]);
    }

    #[test]
    fn test_history_dedup_keeps_first_in_order() {
        let mut t = Timeline::new("c1");
        t.load_history(vec![
            confirmed("s1", "one"),
            confirmed("s2", "two"),
            confirmed("s1", "one-again"),
            confirmed("s3", "three"),
        ]);
        assert_eq!(ids(&t), vec!["s1", "s2", "s3"]);
        assert_eq!(t.messages()[0].content.as_deref(), Some("one"));
    }

    #[test]
    fn test_load_history_resets_seen_set() {
        let mut t = Timeline::new("c1");
        t.admit_pushed(confirmed("s1", "old"));
        t.load_history(vec![confirmed("s2", "new")]);
        // s1 is admissible again after the wholesale replace
        t.admit_pushed(confirmed("s1", "old"));
        assert_eq!(ids(&t), vec!["s2", "s1"]);
    }

    #[test]
    fn test_fail_send_removes_entry() {
        let mut t = Timeline::new("c1");
        let local_id = t.append_local_pending(&Draft::text("hi"), "me");
        t.fail_send(&local_id);
        assert!(t.is_empty());
    }

    #[test]
    fn test_confirm_without_placeholder_still_admits() {
        let mut t = Timeline::new("c1");
        let local_id = t.append_local_pending(&Draft::text("hi"), "me");
        t.fail_send(&local_id);
        t.confirm_send(&local_id, confirmed("s1", "hi"));
        assert_eq!(ids(&t), vec!["s1"]);
        // and the later push for the same id stays deduplicated
        t.admit_pushed(confirmed("s1", "hi"));
        assert_eq!(ids(&t), vec!["s1"]);
    }

    #[test]
    fn test_interleaved_sends_and_pushes() {
        let mut t = Timeline::new("c1");
        let a = t.append_local_pending(&Draft::text("A"), "me");
        t.admit_pushed(confirmed("p1", "from peer"));
        let b = t.append_local_pending(&Draft::text("B"), "me");
        t.confirm_send(&a, confirmed("sA", "A"));
        t.admit_pushed(confirmed("p2", "from peer"));
        t.confirm_send(&b, confirmed("sB", "B"));
        // confirmed sends stay in the slots their pending entries held
        assert_eq!(ids(&t), vec!["sA", "p1", "sB", "p2"]);
    }
}
