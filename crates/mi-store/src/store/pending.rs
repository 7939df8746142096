//! `pending.log`: the durable backlog backing `PendingOutgoing` (§4.8) —
//! messages that could not be delivered on the first attempt and are
//! retried with backoff until they succeed, are explicitly abandoned, or
//! hit a non-retryable protocol error.

use std::path::{Path, PathBuf};

use mi_core::ids::MessageId;
use mi_core::model::PendingOutgoingEntry;
use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum PendingEvent {
    Enqueued(PendingOutgoingEntry),
    AttemptRecorded {
        message_id: MessageId,
        attempts: u32,
        last_attempt_ms: i64,
    },
    Removed {
        message_id: MessageId,
    },
}

pub struct PendingStore {
    path: PathBuf,
    // Order preserved: entries are retried in FIFO enqueue order.
    entries: Vec<PendingOutgoingEntry>,
}

impl PendingStore {
    pub fn open(account_dir: &Path) -> Result<Self> {
        let path = account_dir.join("pending.log");
        let mut store = PendingStore {
            path,
            entries: Vec::new(),
        };
        store.replay()?;
        Ok(store)
    }

    fn replay(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        for line in contents.lines().filter(|l| !l.is_empty()) {
            let event: PendingEvent = serde_json::from_str(line)?;
            self.apply(event);
        }
        Ok(())
    }

    fn apply(&mut self, event: PendingEvent) {
        match event {
            PendingEvent::Enqueued(entry) => {
                if !self.entries.iter().any(|e| e.message_id == entry.message_id) {
                    self.entries.push(entry);
                }
            }
            PendingEvent::AttemptRecorded {
                message_id,
                attempts,
                last_attempt_ms,
            } => {
                if let Some(entry) = self.entries.iter_mut().find(|e| e.message_id == message_id) {
                    entry.attempts = attempts;
                    entry.last_attempt_ms = last_attempt_ms;
                }
            }
            PendingEvent::Removed { message_id } => {
                self.entries.retain(|e| e.message_id != message_id);
            }
        }
    }

    fn append(&self, event: &PendingEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        atomic::append_line(&self.path, &line)
    }

    pub fn enqueue(&mut self, entry: PendingOutgoingEntry) -> Result<()> {
        let event = PendingEvent::Enqueued(entry);
        self.append(&event)?;
        self.apply(event);
        Ok(())
    }

    pub fn record_attempt(&mut self, message_id: MessageId, attempts: u32, last_attempt_ms: i64) -> Result<()> {
        let event = PendingEvent::AttemptRecorded {
            message_id,
            attempts,
            last_attempt_ms,
        };
        self.append(&event)?;
        self.apply(event);
        Ok(())
    }

    pub fn remove(&mut self, message_id: MessageId) -> Result<()> {
        let event = PendingEvent::Removed { message_id };
        self.append(&event)?;
        self.apply(event);
        Ok(())
    }

    pub fn entries(&self) -> &[PendingOutgoingEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mi_core::model::{ConversationId, PendingKind};
    use tempfile::tempdir;

    fn entry(message_id: MessageId) -> PendingOutgoingEntry {
        PendingOutgoingEntry {
            conversation_id: ConversationId::Peer("bob".into()),
            message_id,
            kind: PendingKind::Text,
            body: vec![1, 2, 3],
            attempts: 0,
            last_attempt_ms: 0,
        }
    }

    #[test]
    fn enqueue_persists_across_reopen_in_fifo_order() {
        let dir = tempdir().unwrap();
        let a = MessageId::random();
        let b = MessageId::random();
        {
            let mut store = PendingStore::open(dir.path()).unwrap();
            store.enqueue(entry(a)).unwrap();
            store.enqueue(entry(b)).unwrap();
        }
        let store = PendingStore::open(dir.path()).unwrap();
        let ids: Vec<_> = store.entries().iter().map(|e| e.message_id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn attempts_accumulate_and_persist() {
        let dir = tempdir().unwrap();
        let id = MessageId::random();
        let mut store = PendingStore::open(dir.path()).unwrap();
        store.enqueue(entry(id)).unwrap();
        store.record_attempt(id, 1, 1000).unwrap();
        store.record_attempt(id, 2, 5000).unwrap();
        assert_eq!(store.entries()[0].attempts, 2);
        assert_eq!(store.entries()[0].last_attempt_ms, 5000);

        let reopened = PendingStore::open(dir.path()).unwrap();
        assert_eq!(reopened.entries()[0].attempts, 2);
    }

    #[test]
    fn removal_drops_the_entry() {
        let dir = tempdir().unwrap();
        let id = MessageId::random();
        let mut store = PendingStore::open(dir.path()).unwrap();
        store.enqueue(entry(id)).unwrap();
        store.remove(id).unwrap();
        assert!(store.is_empty());

        let reopened = PendingStore::open(dir.path()).unwrap();
        assert!(reopened.is_empty());
    }
}
