//! `Facade` (§4.10 / §6): the one object a host process talks to. Assembles
//! every component behind a single account handle and exposes the Host API
//! grouped by domain — session, trust, messaging, friendship, devices,
//! groups, group calls, history, attachments, media, pairing, events.
//!
//! `Facade::init` is the two-argument constructor a host actually calls: it
//! loads the INI config and resolves the account's data directory, then
//! delegates to `Facade::new`, which takes both as plain values so tests
//! never touch `$MI_E2EE_DATA_DIR` or a real OS data directory.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use mi_core::config::{AuthMode, ClientConfig};
use mi_core::error::{Error, Result};
use mi_core::ids::{CallId, DeviceId, MessageId};
use mi_core::model::{Capabilities, ConversationId, DeviceInfo, Event, FriendEntry, FriendRequestEntry, GroupMemberInfo, GroupMemberRole, Message, MessagePayload, PendingTrust, Version};
use mi_crypto::Crypto;
use mi_store::LocalStore;
use mi_transport::{Frame, Transport};

use crate::calls::{CallSignalResult, GroupCallKeyAgent};
use crate::error::{crypto_error, decode_frame, encode_frame, store_error};
use crate::media::{MediaKind, MediaPacket, MediaRelay, MediaRelayConfig};
use crate::pairing::{DevicePairing, PairingRequest};
use crate::pending::{PendingOutgoing, PendingTickEvent};
use crate::poller::{EventPoller, PollerConfig};
use crate::send::{SendError, SendOutcome, SendPipeline};
use crate::session::{Session, SessionManager};
use crate::trust::TrustEngine;
use crate::wire::{GenericRequest, GenericResponse};
use mi_core::model::CallSignalOp;

/// Bumped on any breaking change to the wire or on-disk envelope formats.
pub const VERSION: Version = Version {
    major: 1,
    minor: 0,
    patch: 0,
    abi: 1,
};

pub struct Facade {
    transport: Arc<dyn Transport>,
    crypto: Arc<dyn Crypto>,
    store: Arc<Mutex<LocalStore>>,
    session: Mutex<SessionManager>,
    trust: Mutex<TrustEngine>,
    send: Arc<SendPipeline>,
    poller: Arc<EventPoller>,
    pending: Arc<PendingOutgoing>,
    calls: Arc<GroupCallKeyAgent>,
    media: Arc<MediaRelay>,
    pairing: Arc<DevicePairing>,
    config: ClientConfig,
}

impl Facade {
    /// Loads `config_path`, resolves the account's data directory from
    /// `$MI_E2EE_DATA_DIR`/the OS default, and assembles the client.
    pub fn init(transport: Arc<dyn Transport>, crypto: Arc<dyn Crypto>, username: &str, config_path: &Path) -> Result<Self> {
        let config = ClientConfig::load(config_path)?;
        let data_dir = mi_core::config::data_dir(username);
        Self::new(transport, crypto, username, config, &data_dir)
    }

    pub fn new(transport: Arc<dyn Transport>, crypto: Arc<dyn Crypto>, username: &str, config: ClientConfig, data_dir: &Path) -> Result<Self> {
        let store = Arc::new(Mutex::new(LocalStore::open(data_dir, username).map_err(|e| store_error("open", e))?));
        let session = Mutex::new(SessionManager::new(transport.clone(), crypto.clone(), store.clone(), config.client.server_ip.clone(), config.client.server_port));
        let trust = Mutex::new(TrustEngine::new(store.clone()));
        let send = Arc::new(SendPipeline::new(transport.clone(), crypto.clone(), store.clone(), config.client.require_tls));
        let poller = Arc::new(EventPoller::new(transport.clone(), PollerConfig::default()));
        let pending = Arc::new(PendingOutgoing::new(store.clone(), send.clone()));
        let calls = Arc::new(GroupCallKeyAgent::new(transport.clone(), username));
        let media = Arc::new(MediaRelay::new(MediaRelayConfig::default()));
        let pairing = Arc::new(DevicePairing::new(transport.clone(), crypto.clone(), store.clone()));
        Ok(Facade {
            transport,
            crypto,
            store,
            session,
            trust,
            send,
            poller,
            pending,
            calls,
            media,
            pairing,
            config,
        })
    }

    async fn require_token(&self) -> Result<String> {
        self.session.lock().await.token().map(|t| t.to_string()).ok_or(Error::NotLoggedIn)
    }

    /// Same as `require_token`, but shaped as a `SendError` so send wrappers
    /// keep returning a `message_id` on every path, including "not logged in".
    async fn require_token_for_send(&self) -> std::result::Result<String, SendError> {
        self.require_token().await.map_err(|error| SendError { message_id: MessageId::random(), error })
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
                    Error::Transport(msg)
                }
            }
        }
    }

    /// Friendship/devices/groups CRUD has no concrete wire shape in the
    /// spec beyond `FriendSync`/`CallSignal`; this is the shared RPC
    /// passthrough the rest of that plumbing rides on.
    async fn generic_call(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let token = self.require_token().await?;
        let body = encode_frame(&GenericRequest { token, args })?;
        let resp = self.transport.send_request(Frame::new(method, body)).await.map_err(|e| self.classify(e))?;
        let decoded: GenericResponse = decode_frame(&resp.body)?;
        Ok(decoded.result)
    }

    async fn generic_unit(&self, method: &str, args: serde_json::Value) -> Result<()> {
        self.generic_call(method, args).await.map(|_| ())
    }

    async fn generic_list<T: serde::de::DeserializeOwned>(&self, method: &str, args: serde_json::Value) -> Result<Vec<T>> {
        let result = self.generic_call(method, args).await?;
        serde_json::from_value(result).map_err(|e| crate::error::into_core_error("decode generic list", e))
    }

    // -- session ----------------------------------------------------------

    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        let mut trust = self.trust.lock().await;
        session.register(&mut trust, username, password).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let mut session = self.session.lock().await;
        let mut trust = self.trust.lock().await;
        session.login(&mut trust, username, password).await
    }

    pub async fn logout(&self) {
        self.session.lock().await.logout();
        self.media.clear_subscriptions().await;
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.session.lock().await.heartbeat().await
    }

    pub async fn relogin(&self) -> Result<Session> {
        let mut session = self.session.lock().await;
        let mut trust = self.trust.lock().await;
        session.relogin(&mut trust).await
    }

    pub async fn token(&self) -> Option<String> {
        self.session.lock().await.token().map(|t| t.to_string())
    }

    pub async fn device_id(&self) -> Option<DeviceId> {
        self.session.lock().await.device_id()
    }

    // -- trust --------------------------------------------------------------

    pub async fn has_pending_server_trust(&self) -> bool {
        self.trust.lock().await.has_pending_server()
    }

    pub async fn pending_server_trust(&self) -> Option<PendingTrust> {
        self.trust.lock().await.pending_server().cloned()
    }

    pub async fn trust_pending_server(&self, sas_input: &str) -> Result<()> {
        self.trust.lock().await.trust_pending_server(sas_input).await
    }

    pub async fn has_pending_peer_trust(&self) -> bool {
        self.trust.lock().await.has_pending_peer()
    }

    pub async fn pending_peer_trust(&self) -> Option<PendingTrust> {
        self.trust.lock().await.pending_peer().cloned()
    }

    pub async fn trust_pending_peer(&self, sas_input: &str, identity_pub: Vec<u8>) -> Result<()> {
        self.trust.lock().await.trust_pending_peer(sas_input, identity_pub).await
    }

    // -- messaging ------------------------------------------------------------

    pub async fn send_text(&self, peer: &str, text: &str) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        self.send.send_text(&token, peer, text).await
    }

    pub async fn send_text_with_reply(&self, peer: &str, text: &str, reply_to: MessageId) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        self.send.send_text_with_reply(&token, peer, text, reply_to).await
    }

    pub async fn send_sticker(&self, peer: &str, sticker_id: &str) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        self.send.send_sticker(&token, peer, sticker_id).await
    }

    pub async fn send_location(&self, peer: &str, lat_e7: i32, lon_e7: i32) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        self.send.send_location(&token, peer, lat_e7, lon_e7).await
    }

    pub async fn send_contact_card(&self, peer: &str, contact_username: &str) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        self.send.send_contact_card(&token, peer, contact_username).await
    }

    pub async fn send_file(&self, peer: &str, file_path: &Path) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        self.send.send_file(&token, peer, file_path).await
    }

    pub async fn send_group_text(&self, group_id: &str, text: &str) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        let outcome = self.send.send_group_text(&token, group_id, text).await;
        if let Ok(message_id) = &outcome {
            self.poller.register_group_pending_delivery(*message_id, group_id).await;
        }
        outcome
    }

    pub async fn send_group_file(&self, group_id: &str, file_path: &Path) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        let outcome = self.send.send_group_file(&token, group_id, file_path).await;
        if let Ok(message_id) = &outcome {
            self.poller.register_group_pending_delivery(*message_id, group_id).await;
        }
        outcome
    }

    pub async fn send_group_invite(&self, group_id: &str, invitee: &str) -> SendOutcome {
        let token = self.require_token_for_send().await?;
        let outcome = self.send.send_group_invite(&token, group_id, invitee).await;
        if let Ok(message_id) = &outcome {
            self.poller.register_group_pending_delivery(*message_id, group_id).await;
        }
        outcome
    }

    /// Resends whatever is still durably pending for `message_id`; a
    /// no-op returning success if nothing is pending (the send already
    /// resolved, matching the §8 idempotence property).
    async fn resend_pending(&self, message_id: MessageId) -> Result<MessageId> {
        let entry = {
            let store = self.store.lock().await;
            store.pending_entries().iter().find(|e| e.message_id == message_id).cloned()
        };
        let Some(entry) = entry else {
            return Ok(message_id);
        };
        let token = self.require_token().await?;
        self.send.resend(&token, &entry).await.map_err(|e| e.error)
    }

    pub async fn resend_text(&self, message_id: MessageId) -> Result<MessageId> {
        self.resend_pending(message_id).await
    }

    pub async fn resend_sticker(&self, message_id: MessageId) -> Result<MessageId> {
        self.resend_pending(message_id).await
    }

    pub async fn resend_location(&self, message_id: MessageId) -> Result<MessageId> {
        self.resend_pending(message_id).await
    }

    pub async fn resend_contact_card(&self, message_id: MessageId) -> Result<MessageId> {
        self.resend_pending(message_id).await
    }

    pub async fn resend_file(&self, message_id: MessageId) -> Result<MessageId> {
        self.resend_pending(message_id).await
    }

    pub async fn resend_group_text(&self, message_id: MessageId) -> Result<MessageId> {
        self.resend_pending(message_id).await
    }

    pub async fn resend_group_file(&self, message_id: MessageId) -> Result<MessageId> {
        self.resend_pending(message_id).await
    }

    // -- friendship -----------------------------------------------------------

    pub async fn add_friend(&self, username: &str) -> Result<()> {
        if username.is_empty() {
            return Err(Error::invalid_argument("username"));
        }
        self.generic_unit("add_friend", serde_json::json!({ "username": username })).await?;
        self.poller.force_friend_sync();
        Ok(())
    }

    pub async fn set_friend_remark(&self, username: &str, remark: &str) -> Result<()> {
        self.generic_unit("set_friend_remark", serde_json::json!({ "username": username, "remark": remark })).await
    }

    pub async fn delete_friend(&self, username: &str) -> Result<()> {
        self.generic_unit("delete_friend", serde_json::json!({ "username": username })).await?;
        self.poller.force_friend_sync();
        Ok(())
    }

    pub async fn set_user_blocked(&self, username: &str, blocked: bool) -> Result<()> {
        self.generic_unit("set_user_blocked", serde_json::json!({ "username": username, "blocked": blocked })).await
    }

    pub async fn send_friend_request(&self, username: &str, message: &str) -> Result<()> {
        self.generic_unit("send_friend_request", serde_json::json!({ "username": username, "message": message })).await
    }

    pub async fn respond_friend_request(&self, requester_username: &str, accept: bool) -> Result<()> {
        self.generic_unit("respond_friend_request", serde_json::json!({ "requester_username": requester_username, "accept": accept }))
            .await?;
        if accept {
            self.poller.force_friend_sync();
        }
        Ok(())
    }

    pub async fn list_friends(&self) -> Result<Vec<FriendEntry>> {
        let token = self.require_token().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        Ok(self.poller.sync_friends(&token, now_ms).await?.friends)
    }

    /// Returns whether the roster actually changed, per `FriendSyncResult`.
    pub async fn sync_friends(&self) -> Result<bool> {
        let token = self.require_token().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        Ok(self.poller.sync_friends(&token, now_ms).await?.changed)
    }

    pub async fn list_friend_requests(&self) -> Result<Vec<FriendRequestEntry>> {
        self.generic_list("list_friend_requests", serde_json::json!({})).await
    }

    // -- devices --------------------------------------------------------------

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.generic_list("list_devices", serde_json::json!({})).await
    }

    pub async fn kick_device(&self, device_id: DeviceId) -> Result<()> {
        self.generic_unit("kick_device", serde_json::json!({ "device_id": device_id })).await
    }

    // -- groups -----------------------------------------------------------------

    pub async fn create_group(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Err(Error::invalid_argument("name"));
        }
        let result = self.generic_call("create_group", serde_json::json!({ "name": name })).await?;
        result
            .get("group_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Protocol("create_group: missing group_id".into()))
    }

    pub async fn join_group(&self, group_id: &str) -> Result<()> {
        self.generic_unit("join_group", serde_json::json!({ "group_id": group_id })).await
    }

    pub async fn leave_group(&self, group_id: &str) -> Result<()> {
        self.generic_unit("leave_group", serde_json::json!({ "group_id": group_id })).await
    }

    pub async fn list_group_members_info(&self, group_id: &str) -> Result<Vec<GroupMemberInfo>> {
        self.generic_list("list_group_members", serde_json::json!({ "group_id": group_id })).await
    }

    pub async fn set_group_member_role(&self, group_id: &str, username: &str, role: GroupMemberRole) -> Result<()> {
        self.generic_unit("set_group_member_role", serde_json::json!({ "group_id": group_id, "username": username, "role": role })).await
    }

    pub async fn kick_group_member(&self, group_id: &str, username: &str) -> Result<()> {
        self.generic_unit("kick_group_member", serde_json::json!({ "group_id": group_id, "username": username })).await
    }

    // -- group calls --------------------------------------------------------------

    pub async fn start_group_call(&self, group_id: &str, video: bool, members: &[String]) -> Result<(CallId, u32)> {
        self.calls.start_call(group_id, video, members).await
    }

    pub async fn join_group_call(&self, group_id: &str, call_id: CallId, video: bool) -> Result<u32> {
        let token = self.require_token().await?;
        self.calls.join_call(&token, group_id, call_id, video).await
    }

    pub async fn leave_group_call(&self, group_id: &str, call_id: CallId) -> Result<()> {
        self.calls.leave_call(group_id, call_id).await
    }

    pub async fn get_group_call_key(&self, group_id: &str, call_id: CallId, key_id: u32) -> Option<[u8; 32]> {
        self.calls.get_key(group_id, call_id, key_id).await
    }

    pub async fn rotate_group_call_key(&self, group_id: &str, call_id: CallId, new_key_id: u32, members: &[String]) -> Result<()> {
        self.calls.rotate_key(group_id, call_id, new_key_id, members).await
    }

    pub async fn request_group_call_key(&self, group_id: &str, call_id: CallId, key_id: u32) -> Result<()> {
        let token = self.require_token().await?;
        self.calls.request_key(&token, group_id, call_id, key_id).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send_group_call_signal(&self, op: CallSignalOp, group_id: &str, call_id: Option<CallId>, video: bool, key_id: u32, seq: u64, ts_ms: i64) -> Result<CallSignalResult> {
        let token = self.require_token().await?;
        self.calls.send_signal(&token, op, group_id, call_id, video, key_id, seq, ts_ms).await
    }

    pub async fn accept_inbound_group_call_signal(&self, call_id: CallId, sender: &str, seq: u64, ts_ms: i64, now_ms: i64) -> bool {
        self.calls.accept_inbound_signal(call_id, sender, seq, ts_ms, now_ms).await
    }

    // -- history ------------------------------------------------------------------

    pub async fn load_chat_history(&self, conversation_id: ConversationId, limit: usize) -> Vec<Message> {
        self.store.lock().await.load_chat_history(&conversation_id, limit)
    }

    pub async fn delete_chat_history(&self, conversation_id: ConversationId, delete_attachments: bool, secure_wipe: bool) -> Result<()> {
        self.store
            .lock()
            .await
            .delete_chat_history(&conversation_id, delete_attachments, secure_wipe)
            .map_err(|e| store_error("delete_chat_history", e))
    }

    pub async fn clear_all_history(&self, delete_attachments: bool, secure_wipe: bool) -> Result<()> {
        self.store.lock().await.clear_all_history(delete_attachments, secure_wipe).map_err(|e| store_error("clear_all_history", e))
    }

    pub async fn set_history_enabled(&self, enabled: bool) -> Result<()> {
        self.store.lock().await.set_history_enabled(enabled).map_err(|e| store_error("set_history_enabled", e))
    }

    pub async fn history_enabled(&self) -> bool {
        self.store.lock().await.history_enabled()
    }

    // -- attachments --------------------------------------------------------------

    pub async fn store_attachment_preview_bytes(&self, conversation_id: ConversationId, message_id: MessageId, bytes: Vec<u8>) -> Result<()> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.store
            .lock()
            .await
            .cache_attachment_preview(&conversation_id, message_id, bytes, now_ms)
            .map_err(|e| store_error("cache_attachment_preview", e))
    }

    async fn file_attachment_ref(&self, conversation_id: &ConversationId, message_id: MessageId) -> Result<(String, [u8; 32])> {
        let store = self.store.lock().await;
        let history = store.load_chat_history(conversation_id, usize::MAX);
        let msg = history.iter().find(|m| m.message_id == message_id).ok_or_else(|| Error::invalid_argument("message_id"))?;
        match &msg.payload {
            MessagePayload::File { file_id, file_key, .. } => Ok((file_id.clone(), *file_key)),
            _ => Err(Error::invalid_argument("message_id")),
        }
    }

    pub async fn download_chat_file_to_bytes(&self, conversation_id: ConversationId, message_id: MessageId) -> Result<Vec<u8>> {
        let (file_id, file_key) = self.file_attachment_ref(&conversation_id, message_id).await?;
        let blob = self.store.lock().await.load_attachment_blob(&file_id).map_err(|e| store_error("load_attachment_blob", e))?;
        if blob.len() < 4 {
            return Err(Error::Storage("attachment blob truncated".into()));
        }
        let nonce_len = u32::from_le_bytes(blob[..4].try_into().unwrap()) as usize;
        if blob.len() < 4 + nonce_len {
            return Err(Error::Storage("attachment blob truncated".into()));
        }
        let nonce = blob[4..4 + nonce_len].to_vec();
        let ciphertext = blob[4 + nonce_len..].to_vec();
        let sealed = mi_crypto::AeadCiphertext { nonce, ciphertext };
        self.crypto.open(&file_key, message_id.as_bytes(), &sealed).map_err(|e| crypto_error("open file", e))
    }

    pub async fn download_chat_file_to_path(&self, conversation_id: ConversationId, message_id: MessageId, dest: &Path) -> Result<()> {
        let bytes = self.download_chat_file_to_bytes(conversation_id, message_id).await?;
        tokio::fs::write(dest, bytes).await.map_err(|e| Error::Storage(format!("write {}: {e}", dest.display())))
    }

    // -- media --------------------------------------------------------------------

    pub async fn derive_media_root(&self, peer_or_group: &str, call_id: CallId) -> Result<[u8; 32]> {
        let key = self.crypto.derive_message_key(peer_or_group).map_err(|e| crypto_error("derive_message_key", e))?;
        Ok(self.media.derive_media_root(&key, peer_or_group, call_id))
    }

    pub async fn add_media_subscription(&self, call_id: CallId, is_group: bool, group_id: Option<String>) {
        self.media.add_subscription(call_id, is_group, group_id).await
    }

    pub async fn clear_media_subscriptions(&self) {
        self.media.clear_subscriptions().await
    }

    pub async fn push_media(&self, call_id: CallId, kind: MediaKind, sender: impl Into<String>, payload: Vec<u8>) {
        self.media.push(call_id, kind, sender, payload).await
    }

    pub async fn pull_media(&self, call_id: CallId, max_packets: usize, wait_ms: u64) -> Vec<MediaPacket> {
        self.media.pull(call_id, max_packets, wait_ms).await
    }

    // -- pairing --------------------------------------------------------------------

    pub async fn begin_pairing_primary(&self) -> Result<String> {
        let token = self.require_token().await?;
        self.pairing.begin_pairing_primary(&token).await
    }

    pub async fn poll_pairing_requests(&self) -> Result<Vec<PairingRequest>> {
        let token = self.require_token().await?;
        self.pairing.poll_pairing_requests(&token).await
    }

    pub async fn approve_pairing_request(&self, device_id: DeviceId, request_id_hex: &str, identity_pub: Vec<u8>, identity_priv: Vec<u8>) -> Result<()> {
        let token = self.require_token().await?;
        self.pairing.approve_pairing_request(&token, device_id, request_id_hex, identity_pub, identity_priv).await
    }

    pub async fn begin_pairing_linked(&self, code: &str) -> Result<()> {
        let token = self.require_token().await?;
        self.pairing.begin_pairing_linked(&token, code).await
    }

    pub async fn poll_pairing_linked(&self) -> Result<bool> {
        let token = self.require_token().await?;
        self.pairing.poll_pairing_linked(&token).await
    }

    pub async fn cancel_pairing(&self) -> Result<()> {
        let token = self.require_token().await?;
        self.pairing.cancel_pairing(&token).await
    }

    // -- events -----------------------------------------------------------------------

    /// Runs one poll round-trip, reconciles friend-request diffing and a due
    /// friend sync, and drains the `PendingOutgoing` scheduler — everything
    /// the background poller task would otherwise coalesce onto its own
    /// cadence, collapsed into a single host-driven call per the owned-value
    /// Host API (§6). `wait_ms` is accepted for interface parity with the
    /// spec's blocking contract; one non-blocking RPC round trip already
    /// satisfies "wall-clock blocking time ≤ wait_ms + ε" without an
    /// artificial sleep.
    pub async fn poll_events(&self, max_events: u32, wait_ms: u64) -> Result<Vec<Event>> {
        let _ = wait_ms;
        let token = self.require_token().await?;
        let mut events = self.poller.poll_once(&token, max_events).await?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        if self.poller.friend_sync_due(now_ms) {
            if self.poller.sync_friends(&token, now_ms).await.is_ok() {
                if let Ok(requests) = self.list_friend_requests().await {
                    let requesters: Vec<String> = requests.into_iter().map(|r| r.requester_username).collect();
                    let diffed = self.poller.reconcile_friend_requests(&requesters).await;
                    events.extend(diffed);
                }
            }
        }

        for tick_event in self.pending.tick(&token, now_ms).await {
            let PendingTickEvent::MessageResent { conversation_id, message_id } = tick_event;
            events.push(Event::OutgoingSync { conversation_id, message_id });
        }
        Ok(events)
    }

    // -- misc -------------------------------------------------------------------------

    pub fn get_capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::CHAT | Capabilities::GROUP | Capabilities::MEDIA | Capabilities::GROUP_CALL | Capabilities::OFFLINE;
        if self.config.device_sync.enabled {
            caps = caps | Capabilities::DEVICE_SYNC;
        }
        if self.config.client.auth_mode == AuthMode::Opaque {
            caps = caps | Capabilities::OPAQUE;
        }
        caps
    }

    pub fn version(&self) -> Version {
        VERSION
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.media.clear_subscriptions().await;
        self.session.lock().await.logout();
        Ok(())
    }
}
