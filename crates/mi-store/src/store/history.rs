//! `history.log`: normalized `Message` records, one per append, plus
//! status-update events, replayed into an in-memory per-conversation index.
//!
//! Deletion (`delete_chat_history`, `clear_all_history`) requires actual
//! removal rather than pure append, so those paths compact the log via
//! `atomic::atomic_write` instead of appending — the "periodic compaction"
//! the layout contract in §4.7 calls for.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mi_core::ids::MessageId;
use mi_core::model::{ConversationId, Message, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum HistoryEvent {
    Append(Message),
    StatusUpdate {
        message_id: MessageId,
        status: MessageStatus,
    },
}

pub struct HistoryStore {
    path: PathBuf,
    flag_path: PathBuf,
    by_conversation: HashMap<ConversationId, Vec<Message>>,
    enabled: bool,
}

impl HistoryStore {
    pub fn open(account_dir: &Path) -> Result<Self> {
        let path = account_dir.join("history.log");
        let flag_path = account_dir.join("history_enabled");
        let enabled = !flag_path.exists() || std::fs::read_to_string(&flag_path)?.trim() != "0";
        let mut store = HistoryStore {
            path,
            flag_path,
            by_conversation: HashMap::new(),
            enabled,
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
            let event: HistoryEvent = serde_json::from_str(line)?;
            self.apply(event);
        }
        Ok(())
    }

    fn apply(&mut self, event: HistoryEvent) {
        match event {
            HistoryEvent::Append(msg) => {
                self.by_conversation
                    .entry(msg.conversation_id.clone())
                    .or_default()
                    .push(msg);
            }
            HistoryEvent::StatusUpdate { message_id, status } => {
                for messages in self.by_conversation.values_mut() {
                    if let Some(msg) = messages.iter_mut().find(|m| m.message_id == message_id) {
                        msg.apply_status(status);
                        break;
                    }
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_history_enabled(&mut self, enabled: bool) -> Result<()> {
        self.enabled = enabled;
        atomic::atomic_write(&self.flag_path, if enabled { b"1" } else { b"0" })
    }

    fn record(&mut self, msg: Message) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let event = HistoryEvent::Append(msg.clone());
        let line = serde_json::to_string(&event)?;
        atomic::append_line(&self.path, &line)?;
        self.apply(event);
        Ok(())
    }

    pub fn record_outgoing(&mut self, msg: Message) -> Result<()> {
        self.record(msg)
    }

    pub fn record_incoming(&mut self, msg: Message) -> Result<()> {
        self.record(msg)
    }

    pub fn update_status(&mut self, message_id: MessageId, status: MessageStatus) -> Result<()> {
        if !self.enabled {
            // In-memory continues to track state regardless of persistence.
            self.apply(HistoryEvent::StatusUpdate { message_id, status });
            return Ok(());
        }
        let event = HistoryEvent::StatusUpdate { message_id, status };
        let line = serde_json::to_string(&event)?;
        atomic::append_line(&self.path, &line)?;
        self.apply(event);
        Ok(())
    }

    /// Newest last, up to `limit`.
    pub fn load_chat_history(&self, conv: &ConversationId, limit: usize) -> Vec<Message> {
        let messages = self.by_conversation.get(conv);
        match messages {
            None => Vec::new(),
            Some(all) => {
                let start = all.len().saturating_sub(limit);
                all[start..].to_vec()
            }
        }
    }

    fn compact(&mut self) -> Result<()> {
        let mut lines = Vec::new();
        for messages in self.by_conversation.values() {
            for msg in messages {
                lines.push(serde_json::to_string(&HistoryEvent::Append(msg.clone()))?);
            }
        }
        let contents = if lines.is_empty() {
            String::new()
        } else {
            format!("{}\n", lines.join("\n"))
        };
        atomic::atomic_write(&self.path, contents.as_bytes())
    }

    /// Returns the `file_id`s that were referenced by deleted messages, so
    /// the caller can drop/wipe the matching attachment blobs.
    pub fn delete_chat_history(&mut self, conv: &ConversationId) -> Result<Vec<String>> {
        let removed = self.by_conversation.remove(conv).unwrap_or_default();
        let file_ids = removed
            .iter()
            .filter_map(|m| match &m.payload {
                mi_core::model::MessagePayload::File { file_id, .. } => Some(file_id.clone()),
                _ => None,
            })
            .collect();
        self.compact()?;
        Ok(file_ids)
    }

    pub fn clear_all_history(&mut self) -> Result<Vec<String>> {
        let mut file_ids = Vec::new();
        for messages in self.by_conversation.values() {
            for m in messages {
                if let mi_core::model::MessagePayload::File { file_id, .. } = &m.payload {
                    file_ids.push(file_id.clone());
                }
            }
        }
        self.by_conversation.clear();
        self.compact()?;
        Ok(file_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mi_core::model::MessagePayload;

    fn msg(conv: ConversationId, status: MessageStatus) -> Message {
        Message {
            message_id: MessageId::random(),
            conversation_id: conv,
            outgoing: true,
            payload: MessagePayload::text("hi", None),
            status,
            timestamp_sec: 0,
            sender: None,
        }
    }

    #[test]
    fn history_persists_and_reloads_newest_last() {
        let dir = tempfile::tempdir().unwrap();
        let conv = ConversationId::Peer("bob".into());
        {
            let mut store = HistoryStore::open(dir.path()).unwrap();
            for _ in 0..3 {
                store.record_outgoing(msg(conv.clone(), MessageStatus::Sent)).unwrap();
            }
        }
        let store = HistoryStore::open(dir.path()).unwrap();
        let loaded = store.load_chat_history(&conv, 10);
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn load_chat_history_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let conv = ConversationId::Peer("bob".into());
        let mut store = HistoryStore::open(dir.path()).unwrap();
        for _ in 0..5 {
            store.record_outgoing(msg(conv.clone(), MessageStatus::Sent)).unwrap();
        }
        assert_eq!(store.load_chat_history(&conv, 2).len(), 2);
    }

    #[test]
    fn delete_chat_history_removes_and_compacts() {
        let dir = tempfile::tempdir().unwrap();
        let conv = ConversationId::Peer("bob".into());
        let other = ConversationId::Peer("carol".into());
        let mut store = HistoryStore::open(dir.path()).unwrap();
        store.record_outgoing(msg(conv.clone(), MessageStatus::Sent)).unwrap();
        store.record_outgoing(msg(other.clone(), MessageStatus::Sent)).unwrap();
        store.delete_chat_history(&conv).unwrap();
        assert!(store.load_chat_history(&conv, 10).is_empty());
        assert_eq!(store.load_chat_history(&other, 10).len(), 1);

        // reopen to confirm compaction actually persisted
        let reopened = HistoryStore::open(dir.path()).unwrap();
        assert!(reopened.load_chat_history(&conv, 10).is_empty());
        assert_eq!(reopened.load_chat_history(&other, 10).len(), 1);
    }

    #[test]
    fn disabling_history_stops_persistence_but_not_in_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let conv = ConversationId::Peer("bob".into());
        let mut store = HistoryStore::open(dir.path()).unwrap();
        store.set_history_enabled(false).unwrap();
        store.record_outgoing(msg(conv.clone(), MessageStatus::Sent)).unwrap();
        // in-memory still empty because record() no-ops when disabled
        assert!(store.load_chat_history(&conv, 10).is_empty());
    }
}
