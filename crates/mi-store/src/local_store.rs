//! `LocalStore` (§4.7): the per-account aggregate over identity, trust,
//! history, pending-outgoing, and attachment sub-stores, all rooted at one
//! owner-only directory.

use std::path::{Path, PathBuf};

use mi_core::ids::{Fingerprint, MessageId};
use mi_core::model::{ConversationId, Message, MessageStatus, PeerIdentity, PendingOutgoingEntry, ServerPin};
use mi_crypto::Crypto;

use crate::atomic;
use crate::error::Result;
use crate::store::attachments::AttachmentStore;
use crate::store::history::HistoryStore;
use crate::store::identity::{IdentityRecord, IdentityStore};
use crate::store::pending::PendingStore;
use crate::store::trust::TrustStore;

pub struct LocalStore {
    #[allow(dead_code)]
    account_dir: PathBuf,
    identity: IdentityStore,
    trust: TrustStore,
    history: HistoryStore,
    pending: PendingStore,
    attachments: AttachmentStore,
}

impl LocalStore {
    pub fn open(data_dir: &Path, username: &str) -> Result<Self> {
        let account_dir = data_dir.join(username);
        atomic::ensure_dir_owner_only(&account_dir)?;
        Ok(LocalStore {
            identity: IdentityStore::new(&account_dir),
            trust: TrustStore::open(&account_dir)?,
            history: HistoryStore::open(&account_dir)?,
            pending: PendingStore::open(&account_dir)?,
            attachments: AttachmentStore::open(&account_dir)?,
            account_dir,
        })
    }

    // -- identity ---------------------------------------------------

    pub fn has_identity(&self) -> bool {
        self.identity.exists()
    }

    pub fn load_identity(&self, crypto: &dyn Crypto, wrapping_key: &[u8; 32]) -> Result<Option<IdentityRecord>> {
        self.identity.load(crypto, wrapping_key)
    }

    pub fn save_identity(&self, crypto: &dyn Crypto, wrapping_key: &[u8; 32], record: &IdentityRecord) -> Result<()> {
        self.identity.save(crypto, wrapping_key, record)
    }

    // -- trust --------------------------------------------------------

    pub fn server_pin(&self, endpoint: &str) -> Option<&ServerPin> {
        self.trust.server_pin(endpoint)
    }

    pub fn set_server_pin(&mut self, endpoint: &str, fingerprint: Fingerprint, trusted_at: i64) -> Result<()> {
        self.trust.set_server_pin(endpoint, fingerprint, trusted_at)
    }

    pub fn peer_identity(&self, username: &str) -> Option<&PeerIdentity> {
        self.trust.peer_identity(username)
    }

    pub fn set_peer_identity(
        &mut self,
        username: &str,
        identity_pub: Vec<u8>,
        fingerprint: Fingerprint,
        trusted_at: i64,
    ) -> Result<()> {
        self.trust.set_peer_identity(username, identity_pub, fingerprint, trusted_at)
    }

    // -- history --------------------------------------------------------

    pub fn load_chat_history(&self, conv: &ConversationId, limit: usize) -> Vec<Message> {
        self.history.load_chat_history(conv, limit)
    }

    /// `delete_attachments`/`secure_wipe` govern how the blobs referenced by
    /// the removed messages are handled; the history log itself is always
    /// compacted, not securely wiped (it holds no secret key material once
    /// `file_key`s move with their messages, which are dropped here too).
    pub fn delete_chat_history(&mut self, conv: &ConversationId, delete_attachments: bool, secure_wipe: bool) -> Result<()> {
        let file_ids = self.history.delete_chat_history(conv)?;
        if delete_attachments {
            for file_id in file_ids {
                self.attachments.delete_blob(&file_id, secure_wipe)?;
            }
        }
        Ok(())
    }

    pub fn clear_all_history(&mut self, delete_attachments: bool, secure_wipe: bool) -> Result<()> {
        let file_ids = self.history.clear_all_history()?;
        if delete_attachments {
            for file_id in file_ids {
                self.attachments.delete_blob(&file_id, secure_wipe)?;
            }
        }
        Ok(())
    }

    pub fn set_history_enabled(&mut self, enabled: bool) -> Result<()> {
        self.history.set_history_enabled(enabled)
    }

    pub fn history_enabled(&self) -> bool {
        self.history.is_enabled()
    }

    pub fn record_outgoing(&mut self, msg: Message) -> Result<()> {
        self.history.record_outgoing(msg)
    }

    pub fn record_incoming(&mut self, msg: Message) -> Result<()> {
        self.history.record_incoming(msg)
    }

    pub fn update_status(&mut self, message_id: MessageId, status: MessageStatus) -> Result<()> {
        self.history.update_status(message_id, status)
    }

    // -- pending outgoing --------------------------------------------------

    pub fn enqueue_pending(&mut self, entry: PendingOutgoingEntry) -> Result<()> {
        self.pending.enqueue(entry)
    }

    pub fn record_pending_attempt(&mut self, message_id: MessageId, attempts: u32, last_attempt_ms: i64) -> Result<()> {
        self.pending.record_attempt(message_id, attempts, last_attempt_ms)
    }

    pub fn remove_pending(&mut self, message_id: MessageId) -> Result<()> {
        self.pending.remove(message_id)
    }

    pub fn pending_entries(&self) -> &[PendingOutgoingEntry] {
        self.pending.entries()
    }

    // -- attachments --------------------------------------------------

    pub fn save_attachment_blob(&self, file_id: &str, ciphertext: &[u8]) -> Result<()> {
        self.attachments.save_blob(file_id, ciphertext)
    }

    pub fn load_attachment_blob(&self, file_id: &str) -> Result<Vec<u8>> {
        self.attachments.load_blob(file_id)
    }

    pub fn cache_attachment_preview(
        &mut self,
        conv: &ConversationId,
        message_id: MessageId,
        thumbnail: Vec<u8>,
        generated_at_ms: i64,
    ) -> Result<()> {
        self.attachments.cache_preview(conv, message_id, thumbnail, generated_at_ms)
    }

    pub fn cached_attachment_preview(&self, conv: &ConversationId, message_id: MessageId) -> Option<&[u8]> {
        self.attachments.cached_preview(conv, message_id)
    }

    pub fn evict_attachment_preview(&mut self, conv: &ConversationId, message_id: MessageId) -> Result<()> {
        self.attachments.evict_preview(conv, message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mi_core::model::{MessagePayload, PendingKind};
    use tempfile::tempdir;

    #[test]
    fn delete_chat_history_drops_attachment_blobs_when_requested() {
        let dir = tempdir().unwrap();
        let mut store = LocalStore::open(dir.path(), "alice").unwrap();
        let conv = ConversationId::Peer("bob".into());

        let msg = Message {
            message_id: MessageId::random(),
            conversation_id: conv.clone(),
            outgoing: true,
            payload: MessagePayload::File {
                file_id: "file-9".into(),
                file_key: [0u8; 32],
                file_name: "a.bin".into(),
                file_size: 10,
            },
            status: MessageStatus::Sent,
            timestamp_sec: 0,
            sender: None,
        };
        store.record_outgoing(msg).unwrap();
        store.save_attachment_blob("file-9", b"ciphertext").unwrap();

        store.delete_chat_history(&conv, true, false).unwrap();
        assert!(store.load_chat_history(&conv, 10).is_empty());
        assert!(store.load_attachment_blob("file-9").is_err());
    }

    #[test]
    fn pending_roundtrips_through_the_aggregate() {
        let dir = tempdir().unwrap();
        let mut store = LocalStore::open(dir.path(), "alice").unwrap();
        let entry = PendingOutgoingEntry {
            conversation_id: ConversationId::Peer("bob".into()),
            message_id: MessageId::random(),
            kind: PendingKind::Text,
            body: vec![1],
            attempts: 0,
            last_attempt_ms: 0,
        };
        let id = entry.message_id;
        store.enqueue_pending(entry).unwrap();
        assert_eq!(store.pending_entries().len(), 1);
        store.record_pending_attempt(id, 1, 500).unwrap();
        assert_eq!(store.pending_entries()[0].attempts, 1);
        store.remove_pending(id).unwrap();
        assert!(store.pending_entries().is_empty());
    }
}
