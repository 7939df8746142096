//! `PendingOutgoing` retry scheduler (§4.8): drains at most 3 due entries
//! per tick from the durable queue, in insertion order, skipping anything
//! whose backoff window hasn't elapsed yet.

use std::sync::Arc;

use tokio::sync::Mutex;

use mi_core::ids::MessageId;
use mi_core::model::{ConversationId, PendingOutgoingEntry};
use mi_store::LocalStore;

use crate::send::SendPipeline;

const MAX_ATTEMPTS_PER_TICK: usize = 3;
const MAX_BACKOFF_EXP: u32 = 5;
const MAX_BACKOFF_MS: u64 = 30_000;

/// `wait_ms = min(30000, 1000 * 2^min(attempts, 5))`.
pub fn backoff_wait_ms(attempts: u32) -> u64 {
    let exp = attempts.min(MAX_BACKOFF_EXP);
    (1000u64 * 2u64.pow(exp)).min(MAX_BACKOFF_MS)
}

#[derive(Debug, Clone)]
pub enum PendingTickEvent {
    /// A previously-failed send succeeded on retry; the caller should
    /// surface this as `Event::OutgoingSync` to let optimistic UI state
    /// catch up.
    MessageResent { conversation_id: ConversationId, message_id: MessageId },
}

/// Drives `SendPipeline::resend` over `LocalStore`'s durable pending queue.
/// Holds no state of its own beyond the two collaborators it fans out to —
/// the queue itself, and its per-entry backoff clock, live entirely in
/// `LocalStore`.
pub struct PendingOutgoing {
    store: Arc<Mutex<LocalStore>>,
    send: Arc<SendPipeline>,
}

impl PendingOutgoing {
    pub fn new(store: Arc<Mutex<LocalStore>>, send: Arc<SendPipeline>) -> Self {
        PendingOutgoing { store, send }
    }

    /// One scheduling pass. `now_ms` is supplied by the caller (the
    /// `Facade`'s tick driver) rather than read from the clock here, so
    /// this stays deterministic under test.
    pub async fn tick(&self, token: &str, now_ms: i64) -> Vec<PendingTickEvent> {
        let entries: Vec<PendingOutgoingEntry> = {
            let store = self.store.lock().await;
            store.pending_entries().to_vec()
        };

        let mut events = Vec::new();
        let mut attempted = 0usize;
        for entry in entries {
            if attempted >= MAX_ATTEMPTS_PER_TICK {
                break;
            }
            let wait_ms = backoff_wait_ms(entry.attempts);
            if now_ms - entry.last_attempt_ms < wait_ms as i64 {
                continue;
            }
            attempted += 1;
            let conversation_id = entry.conversation_id.clone();
            let message_id = entry.message_id;
            match self.send.resend(token, &entry).await {
                Ok(_) => {
                    tracing::info!(conversation_id = %conversation_id, message_id = %message_id, "pending message resent");
                    events.push(PendingTickEvent::MessageResent { conversation_id, message_id });
                }
                Err(e) => {
                    // `SendPipeline::resend` already persisted the outcome
                    // (removed-as-Failed on a non-retryable classification,
                    // or bumped `attempts`/`last_attempt_ms` on another
                    // transient failure); nothing left to do here but log.
                    tracing::debug!(conversation_id = %conversation_id, message_id = %message_id, error = %e.error, "pending resend still failing");
                }
            }
        }
        events
    }

    /// Removes a pending entry on explicit user cancel, leaving the
    /// message's current history status untouched.
    pub async fn cancel(&self, message_id: MessageId) -> mi_core::Result<()> {
        self.store
            .lock()
            .await
            .remove_pending(message_id)
            .map_err(|e| crate::error::store_error("remove_pending", e))
    }

    pub async fn pending_count(&self) -> usize {
        self.store.lock().await.pending_entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mi_crypto::test_support::InMemoryCrypto;
    use mi_transport::test_support::MockTransport;
    use mi_transport::Frame as WireFrame;
    use tempfile::tempdir;

    fn scheduler() -> (PendingOutgoing, Arc<MockTransport>, Arc<Mutex<LocalStore>>) {
        let transport = Arc::new(MockTransport::new());
        let crypto = Arc::new(InMemoryCrypto::new());
        let dir = tempdir().unwrap();
        let store = Arc::new(Mutex::new(LocalStore::open(dir.path(), "alice").unwrap()));
        let send = Arc::new(SendPipeline::new(transport.clone(), crypto, store.clone(), false));
        (PendingOutgoing::new(store.clone(), send), transport, store)
    }

    #[tokio::test]
    async fn backoff_schedule_matches_spec_table() {
        assert_eq!(backoff_wait_ms(0), 1000);
        assert_eq!(backoff_wait_ms(1), 2000);
        assert_eq!(backoff_wait_ms(5), 30_000);
        assert_eq!(backoff_wait_ms(9), 30_000);
    }

    #[tokio::test]
    async fn due_entry_is_resent_and_removed_on_success() {
        let (scheduler, transport, store) = scheduler();
        transport.set_default_responder(|_| Err(mi_transport::TransportError::Io("tcp recv failed".into())));
        scheduler.send.send_text("tok", "bob", "queued").await.unwrap_err();
        assert_eq!(scheduler.pending_count().await, 1);

        transport.set_default_responder(|frame| Ok(WireFrame::new(&frame.method, serde_json::to_vec(&crate::wire::SendResponse {}).unwrap())));
        let events = scheduler.tick("tok", 10_000_000).await;
        assert_eq!(events.len(), 1);
        assert_eq!(scheduler.pending_count().await, 0);
        let history = store.lock().await.load_chat_history(&ConversationId::Peer("bob".into()), 10);
        assert_eq!(history[0].status, mi_core::model::MessageStatus::Sent);
    }

    #[tokio::test]
    async fn entry_not_yet_due_is_skipped() {
        let (scheduler, transport, _store) = scheduler();
        transport.set_default_responder(|_| Err(mi_transport::TransportError::Io("tcp recv failed".into())));
        scheduler.send.send_text("tok", "bob", "queued").await.unwrap_err();

        transport.set_default_responder(|frame| Ok(WireFrame::new(&frame.method, serde_json::to_vec(&crate::wire::SendResponse {}).unwrap())));
        // `now_ms` equal to `last_attempt_ms` is well inside the 1s backoff window.
        let events = scheduler.tick("tok", 0).await;
        assert!(events.is_empty());
        assert_eq!(scheduler.pending_count().await, 1);
    }

    #[tokio::test]
    async fn non_retryable_failure_on_retry_removes_entry() {
        let (scheduler, transport, store) = scheduler();
        transport.set_default_responder(|_| Err(mi_transport::TransportError::Io("tcp recv failed".into())));
        scheduler.send.send_text("tok", "bob", "queued").await.unwrap_err();

        transport.set_default_responder(|_| Err(mi_transport::TransportError::Io("not friends".into())));
        let events = scheduler.tick("tok", 10_000_000).await;
        assert!(events.is_empty());
        assert_eq!(scheduler.pending_count().await, 0);
        let history = store.lock().await.load_chat_history(&ConversationId::Peer("bob".into()), 10);
        assert_eq!(history[0].status, mi_core::model::MessageStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_removes_without_touching_status() {
        let (scheduler, transport, store) = scheduler();
        transport.set_default_responder(|_| Err(mi_transport::TransportError::Io("tcp recv failed".into())));
        let err = scheduler.send.send_text("tok", "bob", "queued").await.unwrap_err();

        scheduler.cancel(err.message_id).await.unwrap();
        assert_eq!(scheduler.pending_count().await, 0);
        let history = store.lock().await.load_chat_history(&ConversationId::Peer("bob".into()), 10);
        assert_eq!(history[0].status, mi_core::model::MessageStatus::Pending);
    }

    #[tokio::test]
    async fn at_most_three_entries_are_attempted_per_tick() {
        let (scheduler, transport, _store) = scheduler();
        transport.set_default_responder(|_| Err(mi_transport::TransportError::Io("tcp recv failed".into())));
        for peer in ["bob", "carol", "dave", "erin"] {
            scheduler.send.send_text("tok", peer, "queued").await.unwrap_err();
        }
        assert_eq!(scheduler.pending_count().await, 4);

        transport.set_default_responder(|frame| Ok(WireFrame::new(&frame.method, serde_json::to_vec(&crate::wire::SendResponse {}).unwrap())));
        let events = scheduler.tick("tok", 10_000_000).await;
        assert_eq!(events.len(), 3, "fairness cap: at most 3 attempts per tick");
        assert_eq!(scheduler.pending_count().await, 1);
    }
}
