//! `SendPipeline` (§4.3): message-id issuance, AEAD sealing, transport
//! submission, and the retry/failure classification that feeds
//! `PendingOutgoing`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::RngCore;
use tokio::sync::{Mutex, Semaphore};

use mi_core::error::{Error, Result};
use mi_core::ids::MessageId;
use mi_core::model::{ConversationId, Message, MessageKind, MessagePayload, MessageStatus, PendingKind, PendingOutgoingEntry};
use mi_crypto::Crypto;
use mi_store::LocalStore;
use mi_transport::{Frame, Transport};

use crate::error::{encode_frame, store_error};
use crate::wire::SealedWire;

pub const MAX_TEXT_BYTES: usize = 32 * 1024;
pub const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const MAX_PREVIEW_BYTES: usize = 240 * 1024;
const MIN_LAT_E7: i32 = -900_000_000;
const MAX_LAT_E7: i32 = 900_000_000;
const MIN_LON_E7: i32 = -1_800_000_000;
const MAX_LON_E7: i32 = 1_800_000_000;

/// Carries `message_id` on both success and failure so the caller can bind
/// the optimistic local record regardless of outcome — the idiomatic
/// replacement for an out-parameter.
#[derive(Debug)]
pub struct SendError {
    pub message_id: MessageId,
    pub error: Error,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "send {} failed: {}", self.message_id, self.error)
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type SendOutcome = std::result::Result<MessageId, SendError>;

pub struct SendPipeline {
    transport: Arc<dyn Transport>,
    crypto: Arc<dyn Crypto>,
    store: Arc<Mutex<LocalStore>>,
    require_tls: bool,
    file_transfer_slot: Arc<Semaphore>,
    file_transfer_active: Arc<AtomicBool>,
}

struct FileTransferGuard {
    active: Arc<AtomicBool>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Drop for FileTransferGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl SendPipeline {
    pub fn new(transport: Arc<dyn Transport>, crypto: Arc<dyn Crypto>, store: Arc<Mutex<LocalStore>>, require_tls: bool) -> Self {
        SendPipeline {
            transport,
            crypto,
            store,
            require_tls,
            file_transfer_slot: Arc::new(Semaphore::new(1)),
            file_transfer_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn file_transfer_active(&self) -> bool {
        self.file_transfer_active.load(Ordering::SeqCst)
    }

    fn classify(&self, err: mi_transport::TransportError) -> Error {
        use mi_transport::TransportError::*;
        match err {
            PendingServerTrust => Error::TrustRequired(mi_core::error::TrustTarget::Server),
            PendingPeerTrust => Error::TrustRequired(mi_core::error::TrustTarget::Peer),
            other => {
                let msg = other.as_message();
                if Error::is_non_retryable_protocol(&msg) {
                    Error::Protocol(msg)
                } else {
                    Error::Transport(crate::error::augment_transport_message(&msg, self.require_tls))
                }
            }
        }
    }

    async fn attempt_send(&self, token: &str, conversation_id: &ConversationId, message_id: MessageId, kind_label: &str, plaintext: &[u8], ts_sec: i64) -> std::result::Result<(), Error> {
        let key = self
            .crypto
            .derive_message_key(conversation_id.as_str())
            .map_err(|e| crate::error::crypto_error("derive_message_key", e))?;
        let aad = format!("{conversation_id}|{message_id}|{kind_label}|{ts_sec}");
        let sealed = self
            .crypto
            .seal(&key, aad.as_bytes(), plaintext)
            .map_err(|e| crate::error::crypto_error("seal", e))?;
        let body = encode_frame(&crate::wire::SendRequest {
            token: token.to_string(),
            conversation_id: conversation_id.as_str().to_string(),
            is_group: conversation_id.is_group(),
            message_id,
            sealed: SealedWire {
                nonce: sealed.nonce,
                ciphertext: sealed.ciphertext,
            },
        })?;
        let frame = Frame::new("send", body);
        self.transport.send_request(frame).await.map(|_| ()).map_err(|e| self.classify(e))
    }

    /// Runs the attempt, then persists/enqueues/fails per §4.3's
    /// classification table. `is_resend` controls whether a new history
    /// row is created or an existing `Pending` row is advanced.
    #[allow(clippy::too_many_arguments)]
    async fn finish(&self, conversation_id: ConversationId, message_id: MessageId, kind: PendingKind, kind_label: &str, plaintext: Vec<u8>, payload_for_history: Option<MessagePayload>, token: &str, ts_sec: i64, is_resend: bool, prior_attempts: u32) -> SendOutcome {
        let result = self.attempt_send(token, &conversation_id, message_id, kind_label, &plaintext, ts_sec).await;
        let mut store = self.store.lock().await;
        match result {
            Ok(()) => {
                if is_resend {
                    let _ = store.update_status(message_id, MessageStatus::Sent);
                    let _ = store.remove_pending(message_id);
                    let _ = store.evict_attachment_preview(&conversation_id, message_id);
                } else if let Some(payload) = payload_for_history {
                    let _ = store.record_outgoing(Message {
                        message_id,
                        conversation_id,
                        outgoing: true,
                        payload,
                        status: MessageStatus::Sent,
                        timestamp_sec: ts_sec,
                        sender: None,
                    });
                }
                Ok(message_id)
            }
            Err(e @ Error::TrustRequired(_)) => Err(SendError { message_id, error: e }),
            Err(Error::Protocol(msg)) => {
                if is_resend {
                    let _ = store.update_status(message_id, MessageStatus::Failed);
                    let _ = store.remove_pending(message_id);
                } else if let Some(payload) = payload_for_history {
                    let _ = store.record_outgoing(Message {
                        message_id,
                        conversation_id,
                        outgoing: true,
                        payload,
                        status: MessageStatus::Failed,
                        timestamp_sec: ts_sec,
                        sender: None,
                    });
                }
                Err(SendError {
                    message_id,
                    error: Error::Protocol(msg),
                })
            }
            Err(e) => {
                if is_resend {
                    let _ = store.record_pending_attempt(message_id, prior_attempts + 1, ts_sec * 1000);
                } else {
                    if let Some(payload) = payload_for_history {
                        let _ = store.record_outgoing(Message {
                            message_id,
                            conversation_id: conversation_id.clone(),
                            outgoing: true,
                            payload,
                            status: MessageStatus::Pending,
                            timestamp_sec: ts_sec,
                            sender: None,
                        });
                    }
                    let _ = store.enqueue_pending(PendingOutgoingEntry {
                        conversation_id,
                        message_id,
                        kind,
                        body: plaintext,
                        attempts: 0,
                        last_attempt_ms: ts_sec * 1000,
                    });
                }
                Err(SendError { message_id, error: e })
            }
        }
    }

    fn now_sec() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn validate_peer_or_group(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::invalid_argument("conversation_id"));
        }
        Ok(())
    }

    fn validate_text(text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(Error::invalid_argument("text"));
        }
        if text.len() > MAX_TEXT_BYTES {
            return Err(Error::invalid_argument("text"));
        }
        Ok(())
    }

    pub async fn send_text(&self, token: &str, peer: &str, text: &str) -> SendOutcome {
        self.send_text_inner(token, ConversationId::Peer(peer.to_string()), text, None).await
    }

    pub async fn send_text_with_reply(&self, token: &str, peer: &str, text: &str, reply_to: MessageId) -> SendOutcome {
        self.send_text_inner(token, ConversationId::Peer(peer.to_string()), text, Some(reply_to)).await
    }

    pub async fn send_group_text(&self, token: &str, group_id: &str, text: &str) -> SendOutcome {
        self.send_text_inner(token, ConversationId::Group(group_id.to_string()), text, None).await
    }

    async fn send_text_inner(&self, token: &str, conversation_id: ConversationId, text: &str, reply_to: Option<MessageId>) -> SendOutcome {
        if let Err(e) = Self::validate_peer_or_group(conversation_id.as_str()) {
            return Err(SendError { message_id: MessageId::random(), error: e });
        }
        let message_id = MessageId::random();
        if let Err(e) = Self::validate_text(text) {
            return Err(SendError { message_id, error: e });
        }
        let kind = if reply_to.is_some() { PendingKind::ReplyText } else { PendingKind::Text };
        let payload = MessagePayload::text(text, reply_to);
        self.finish(conversation_id, message_id, kind, "text", text.as_bytes().to_vec(), Some(payload), token, Self::now_sec(), false, 0)
            .await
    }

    pub async fn send_sticker(&self, token: &str, peer: &str, sticker_id: &str) -> SendOutcome {
        let conversation_id = ConversationId::Peer(peer.to_string());
        if let Err(e) = Self::validate_peer_or_group(conversation_id.as_str()) {
            return Err(SendError { message_id: MessageId::random(), error: e });
        }
        let message_id = MessageId::random();
        if sticker_id.is_empty() {
            return Err(SendError {
                message_id,
                error: Error::invalid_argument("sticker_id"),
            });
        }
        let payload = MessagePayload::Sticker { sticker_id: sticker_id.to_string() };
        self.finish(conversation_id, message_id, PendingKind::Sticker, "sticker", sticker_id.as_bytes().to_vec(), Some(payload), token, Self::now_sec(), false, 0)
            .await
    }

    pub async fn send_location(&self, token: &str, peer: &str, lat_e7: i32, lon_e7: i32) -> SendOutcome {
        let conversation_id = ConversationId::Peer(peer.to_string());
        let message_id = MessageId::random();
        if !(MIN_LAT_E7..=MAX_LAT_E7).contains(&lat_e7) {
            return Err(SendError {
                message_id,
                error: Error::invalid_argument("lat_e7"),
            });
        }
        if !(MIN_LON_E7..=MAX_LON_E7).contains(&lon_e7) {
            return Err(SendError {
                message_id,
                error: Error::invalid_argument("lon_e7"),
            });
        }
        let plaintext = serde_json::to_vec(&serde_json::json!({ "lat_e7": lat_e7, "lon_e7": lon_e7 })).unwrap_or_default();
        let payload = MessagePayload::System {
            notice: format!("location shared ({lat_e7},{lon_e7})"),
        };
        self.finish(conversation_id, message_id, PendingKind::Location, "location", plaintext, Some(payload), token, Self::now_sec(), false, 0)
            .await
    }

    pub async fn send_contact_card(&self, token: &str, peer: &str, contact_username: &str) -> SendOutcome {
        let conversation_id = ConversationId::Peer(peer.to_string());
        let message_id = MessageId::random();
        if contact_username.is_empty() {
            return Err(SendError {
                message_id,
                error: Error::invalid_argument("contact_username"),
            });
        }
        let plaintext = serde_json::to_vec(&serde_json::json!({ "contact_username": contact_username })).unwrap_or_default();
        let payload = MessagePayload::System {
            notice: format!("contact shared: {contact_username}"),
        };
        self.finish(conversation_id, message_id, PendingKind::ContactCard, "contact_card", plaintext, Some(payload), token, Self::now_sec(), false, 0)
            .await
    }

    async fn send_file_inner(&self, token: &str, conversation_id: ConversationId, file_path: &Path) -> SendOutcome {
        let Ok(permit) = self.file_transfer_slot.clone().try_acquire_owned() else {
            return Err(SendError {
                message_id: MessageId::random(),
                error: Error::Busy("a file transfer is already in progress".into()),
            });
        };
        self.file_transfer_active.store(true, Ordering::SeqCst);
        let _guard = FileTransferGuard {
            active: self.file_transfer_active.clone(),
            _permit: permit,
        };

        let message_id = MessageId::random();
        let metadata = match tokio::fs::metadata(file_path).await {
            Ok(m) => m,
            Err(_) => {
                return Err(SendError {
                    message_id,
                    error: Error::invalid_argument("file_path"),
                })
            }
        };
        if metadata.len() > MAX_FILE_BYTES {
            return Err(SendError {
                message_id,
                error: Error::invalid_argument("file_path"),
            });
        }
        let file_bytes = match tokio::fs::read(file_path).await {
            Ok(b) => b,
            Err(_) => {
                return Err(SendError {
                    message_id,
                    error: Error::invalid_argument("file_path"),
                })
            }
        };
        let file_name = file_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let file_size = file_bytes.len() as u64;

        let mut file_id_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut file_id_bytes);
        let file_id = hex::encode(file_id_bytes);
        let mut file_key = [0u8; 32];
        rand::rng().fill_bytes(&mut file_key);

        let preview_len = file_bytes.len().min(MAX_PREVIEW_BYTES);
        let preview = file_bytes[..preview_len].to_vec();

        let sealed_blob = match self.crypto.seal(&file_key, message_id.as_bytes(), &file_bytes) {
            Ok(s) => s,
            Err(e) => return Err(SendError { message_id, error: crate::error::crypto_error("seal file", e) }),
        };
        // Nonce length is a `Crypto` backend detail, not a wire/storage
        // constant, so it's length-prefixed rather than assumed fixed-size
        // on the read side (`Facade::download_chat_file_to_bytes`).
        let mut blob = (sealed_blob.nonce.len() as u32).to_le_bytes().to_vec();
        blob.extend_from_slice(&sealed_blob.nonce);
        blob.extend_from_slice(&sealed_blob.ciphertext);

        {
            let mut store = self.store.lock().await;
            if let Err(e) = store.save_attachment_blob(&file_id, &blob) {
                return Err(SendError { message_id, error: store_error("save_attachment_blob", e) });
            }
            let _ = store.cache_attachment_preview(&conversation_id, message_id, preview, Self::now_sec() * 1000);
        }

        let announce = serde_json::to_vec(&serde_json::json!({
            "file_id": file_id,
            "file_key": file_key,
            "file_name": file_name,
            "file_size": file_size,
        }))
        .unwrap_or_default();
        let payload = MessagePayload::File {
            file_id,
            file_key,
            file_name,
            file_size,
        };
        self.finish(conversation_id, message_id, PendingKind::File, "file", announce, Some(payload), token, Self::now_sec(), false, 0)
            .await
    }

    pub async fn send_file(&self, token: &str, peer: &str, file_path: &Path) -> SendOutcome {
        self.send_file_inner(token, ConversationId::Peer(peer.to_string()), file_path).await
    }

    pub async fn send_group_file(&self, token: &str, group_id: &str, file_path: &Path) -> SendOutcome {
        self.send_file_inner(token, ConversationId::Group(group_id.to_string()), file_path).await
    }

    pub async fn send_group_invite(&self, token: &str, group_id: &str, invitee: &str) -> SendOutcome {
        let conversation_id = ConversationId::Group(group_id.to_string());
        let message_id = MessageId::random();
        if invitee.is_empty() {
            return Err(SendError {
                message_id,
                error: Error::invalid_argument("invitee"),
            });
        }
        let plaintext = serde_json::to_vec(&serde_json::json!({ "invitee": invitee })).unwrap_or_default();
        self.finish(conversation_id, message_id, PendingKind::Text, "group_invite", plaintext, None, token, Self::now_sec(), false, 0)
            .await
    }

    /// Used by the `PendingOutgoing` scheduler: reuses `message_id`, bumps
    /// `attempts` on continued failure instead of enqueueing afresh.
    pub async fn resend(&self, token: &str, entry: &PendingOutgoingEntry) -> SendOutcome {
        let kind_label = match entry.kind {
            PendingKind::Text | PendingKind::ReplyText => "text",
            PendingKind::Location => "location",
            PendingKind::ContactCard => "contact_card",
            PendingKind::Sticker => "sticker",
            PendingKind::File => "file",
        };
        self.finish(
            entry.conversation_id.clone(),
            entry.message_id,
            entry.kind,
            kind_label,
            entry.body.clone(),
            None,
            token,
            Self::now_sec(),
            true,
            entry.attempts,
        )
        .await
    }
}
