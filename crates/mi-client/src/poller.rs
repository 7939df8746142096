//! `EventPoller` (§4.4): single-threaded cooperative polling of inbound
//! events, friend-list reconciliation on its own cadence, and the
//! backoff/relogin bookkeeping that ties into `SessionManager`.
//!
//! One poll is ever in flight at a time: overlapping `poll_once` calls
//! collapse via `core_work_active` rather than queueing, matching the
//! "single poll in flight, overlapping calls silently collapsed" scheduling
//! contract.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;

use mi_core::error::{Error, Result};
use mi_core::ids::MessageId;
use mi_core::model::{ConversationId, Event, FriendEntry};
use mi_transport::{Frame, Transport};

use crate::error::{decode_frame, encode_frame};
use crate::wire::{FriendSyncRequest, FriendSyncResponse, PollRequest, PollResponse, WireEvent};

const BASE_INTERVAL_MS_DEFAULT: u64 = 2000;
const FRIEND_SYNC_INTERVAL_MS_DEFAULT: u64 = 10_000;
const PENDING_TRUST_INTERVAL_FLOOR_MS: u64 = 5000;
const MAX_BACKOFF_EXP: u32 = 5;
const MAX_BACKOFF_MS: u64 = 30_000;
const GROUP_PENDING_DELIVERIES_CAP: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub base_interval_ms: u64,
    pub friend_sync_interval_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            base_interval_ms: BASE_INTERVAL_MS_DEFAULT,
            friend_sync_interval_ms: FRIEND_SYNC_INTERVAL_MS_DEFAULT,
        }
    }
}

/// Result of a friend-list reconciliation: `changed` mirrors the server's
/// own flag (the roster is authoritative only when this is `true`, per §4.4).
#[derive(Debug, Clone)]
pub struct FriendSyncResult {
    pub changed: bool,
    pub friends: Vec<FriendEntry>,
}

/// Cooperative single-flight poller. Owns no session token itself — callers
/// (the `Facade`) pass the current token in on every call, since token
/// lifecycle belongs to `SessionManager`.
pub struct EventPoller {
    transport: Arc<dyn Transport>,
    config: PollerConfig,
    core_work_active: AtomicBool,
    backoff_exp: AtomicU32,
    friend_sync_forced: AtomicBool,
    last_friend_sync_ms: std::sync::atomic::AtomicI64,
    known_friend_requesters: Mutex<HashSet<String>>,
    group_pending_deliveries: Mutex<LruCache<MessageId, String>>,
}

impl EventPoller {
    pub fn new(transport: Arc<dyn Transport>, config: PollerConfig) -> Self {
        EventPoller {
            transport,
            config,
            core_work_active: AtomicBool::new(false),
            backoff_exp: AtomicU32::new(0),
            friend_sync_forced: AtomicBool::new(false),
            last_friend_sync_ms: std::sync::atomic::AtomicI64::new(0),
            known_friend_requesters: Mutex::new(HashSet::new()),
            group_pending_deliveries: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(GROUP_PENDING_DELIVERIES_CAP).unwrap())),
        }
    }

    /// The interval the caller's timer should wait before the next tick,
    /// per §4.4's cadence rules. `pending_server_trust` forces the 5s floor
    /// with no backoff growth; otherwise backoff only grows while
    /// `remote_mode_stalled` (transport failing, remote mode on, token empty).
    pub fn next_interval_ms(&self, pending_server_trust: bool) -> u64 {
        if pending_server_trust {
            return PENDING_TRUST_INTERVAL_FLOOR_MS;
        }
        let exp = self.backoff_exp.load(Ordering::SeqCst).min(MAX_BACKOFF_EXP);
        (self.config.base_interval_ms * 2u64.pow(exp)).min(MAX_BACKOFF_MS)
    }

    pub fn record_poll_success(&self) {
        self.backoff_exp.store(0, Ordering::SeqCst);
    }

    /// Only grows backoff when `remote_mode` is set and the session holds
    /// an empty token while authenticated, per §4.4.
    pub fn record_poll_failure(&self, remote_mode_stalled: bool) {
        if !remote_mode_stalled {
            return;
        }
        let mut exp = self.backoff_exp.load(Ordering::SeqCst);
        if exp < MAX_BACKOFF_EXP {
            exp += 1;
            self.backoff_exp.store(exp, Ordering::SeqCst);
        }
    }

    /// Attempts to enter the single poll-in-flight section. Returns `false`
    /// if a poll is already running, in which case the caller should treat
    /// this call as a silently-collapsed no-op.
    fn try_enter(&self) -> bool {
        self.core_work_active.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    fn leave(&self) {
        self.core_work_active.store(false, Ordering::SeqCst);
    }

    /// Any friend-mutating RPC should call this so the next cadence check
    /// forces a sync regardless of the 10s interval.
    pub fn force_friend_sync(&self) {
        self.friend_sync_forced.store(true, Ordering::SeqCst);
    }

    pub fn friend_sync_due(&self, now_ms: i64) -> bool {
        if self.friend_sync_forced.load(Ordering::SeqCst) {
            return true;
        }
        let last = self.last_friend_sync_ms.load(Ordering::SeqCst);
        now_ms - last >= self.config.friend_sync_interval_ms as i64
    }

    pub async fn sync_friends(&self, token: &str, now_ms: i64) -> Result<FriendSyncResult> {
        let body = encode_frame(&FriendSyncRequest { token: token.to_string() })?;
        let resp = self.transport.send_request(Frame::new("friend_sync", body)).await.map_err(|e| classify(e))?;
        let decoded: FriendSyncResponse = decode_frame(&resp.body)?;
        self.friend_sync_forced.store(false, Ordering::SeqCst);
        self.last_friend_sync_ms.store(now_ms, Ordering::SeqCst);
        Ok(FriendSyncResult {
            changed: decoded.changed,
            friends: decoded
                .friends
                .into_iter()
                .map(|f| FriendEntry {
                    username: f.username,
                    remark: f.remark,
                })
                .collect(),
        })
    }

    /// Diffs `current` (the authoritative set of outstanding requesters)
    /// against the previously-announced set: newly-seen requesters emit
    /// `FriendRequest` exactly once, entries no longer present are quietly
    /// evicted (no event). Unlike the source, this never wipes the whole
    /// tracking set wholesale (REDESIGN FLAGS / §9 open question).
    pub async fn reconcile_friend_requests(&self, current: &[String]) -> Vec<Event> {
        let mut known = self.known_friend_requesters.lock().await;
        let current_set: HashSet<String> = current.iter().cloned().collect();
        let mut events = Vec::new();
        for requester in &current_set {
            if !known.contains(requester) {
                events.push(Event::FriendRequest {
                    requester_username: requester.clone(),
                });
            }
        }
        known.retain(|r| current_set.contains(r));
        for requester in current_set {
            known.insert(requester);
        }
        events
    }

    /// Outbound group-text sends register here so a later `Delivery` event
    /// whose `from_username` doesn't resolve to a 1:1 peer can still be
    /// attributed to the right group (§4.4).
    pub async fn register_group_pending_delivery(&self, message_id: MessageId, group_id: impl Into<String>) {
        self.group_pending_deliveries.lock().await.put(message_id, group_id.into());
    }

    async fn resolve_group_for_delivery(&self, message_id: MessageId) -> Option<String> {
        self.group_pending_deliveries.lock().await.peek(&message_id).cloned()
    }

    /// Single RPC round-trip fetching up to `max_events` typed events.
    /// Returns an empty vector (never an error) when another poll is
    /// already in flight, per the collapsing contract.
    pub async fn poll_once(&self, token: &str, max_events: u32) -> Result<Vec<Event>> {
        if max_events == 0 {
            return Ok(Vec::new());
        }
        if !self.try_enter() {
            return Ok(Vec::new());
        }
        let result = self.poll_once_inner(token, max_events).await;
        self.leave();
        result
    }

    async fn poll_once_inner(&self, token: &str, max_events: u32) -> Result<Vec<Event>> {
        let body = encode_frame(&PollRequest {
            token: token.to_string(),
            max_events,
        })?;
        let resp = match self.transport.send_request(Frame::new("poll", body)).await {
            Ok(r) => {
                self.record_poll_success();
                r
            }
            Err(e) => {
                return Err(classify(e));
            }
        };
        let decoded: PollResponse = decode_frame(&resp.body)?;
        let mut events = Vec::with_capacity(decoded.events.len());
        for wire in decoded.events {
            events.push(self.convert_event(wire).await);
        }
        Ok(events)
    }

    async fn convert_event(&self, wire: WireEvent) -> Event {
        match wire {
            WireEvent::IncomingText { from_username, message_id, text } => Event::IncomingText {
                conversation_id: ConversationId::Peer(from_username.clone()),
                from_username,
                message_id,
                text,
            },
            WireEvent::IncomingFile {
                from_username,
                message_id,
                file_id,
                file_key,
                file_name,
                file_size,
            } => Event::IncomingFile {
                conversation_id: ConversationId::Peer(from_username.clone()),
                from_username,
                message_id,
                file_id,
                file_key,
                file_name,
                file_size,
            },
            WireEvent::IncomingSticker {
                from_username,
                message_id,
                sticker_id,
            } => Event::IncomingSticker {
                conversation_id: ConversationId::Peer(from_username.clone()),
                from_username,
                message_id,
                sticker_id,
            },
            WireEvent::GroupText {
                group_id,
                from_username,
                message_id,
                text,
            } => Event::GroupText {
                conversation_id: ConversationId::Group(group_id),
                from_username,
                message_id,
                text,
            },
            WireEvent::GroupFile {
                group_id,
                from_username,
                message_id,
                file_id,
                file_key,
                file_name,
                file_size,
            } => Event::GroupFile {
                conversation_id: ConversationId::Group(group_id),
                from_username,
                message_id,
                file_id,
                file_key,
                file_name,
                file_size,
            },
            WireEvent::GroupInvite { group_id, from_username, message_id } => Event::GroupInvite {
                conversation_id: ConversationId::Group(group_id),
                from_username,
                message_id,
            },
            WireEvent::GroupNotice {
                group_id,
                actor_username,
                target_username,
                role,
            } => Event::GroupNotice {
                conversation_id: ConversationId::Group(group_id),
                actor_username,
                target_username,
                role,
            },
            WireEvent::Delivery { from_username, message_id } => {
                let conversation_id = match self.resolve_group_for_delivery(message_id).await {
                    Some(group_id) => ConversationId::Group(group_id),
                    None => ConversationId::Peer(from_username.clone()),
                };
                Event::Delivery {
                    conversation_id,
                    from_username,
                    message_id,
                }
            }
            WireEvent::ReadReceipt { from_username, message_id } => Event::ReadReceipt {
                conversation_id: ConversationId::Peer(from_username.clone()),
                from_username,
                message_id,
            },
            WireEvent::Typing { from_username, typing } => Event::Typing {
                conversation_id: ConversationId::Peer(from_username.clone()),
                from_username,
                typing,
            },
            WireEvent::Presence { from_username, online } => Event::Presence { from_username, online },
            WireEvent::FriendRequest { requester_username } => Event::FriendRequest { requester_username },
            WireEvent::GroupCallSignal {
                group_id,
                op,
                call_id,
                key_id,
                sender,
                seq,
                ts_ms,
            } => Event::GroupCallSignal {
                conversation_id: ConversationId::Group(group_id),
                op,
                call_id,
                key_id,
                sender,
                seq,
                ts_ms,
            },
            WireEvent::OfflinePayload { bytes } => Event::OfflinePayload { bytes },
        }
    }
}

fn classify(err: mi_transport::TransportError) -> Error {
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

#[cfg(test)]
mod tests {
    use super::*;
    use mi_transport::test_support::MockTransport;
    use mi_transport::Frame as WireFrame;

    fn poller() -> (EventPoller, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        (EventPoller::new(transport.clone(), PollerConfig::default()), transport)
    }

    #[tokio::test]
    async fn overlapping_polls_collapse_to_empty() {
        let (poller, transport) = poller();
        transport.set_default_responder(|frame| Ok(WireFrame::new(&frame.method, serde_json::to_vec(&PollResponse { events: vec![] }).unwrap())));
        let poller = Arc::new(poller);
        // simulate an in-flight poll by holding the guard manually
        assert!(poller.try_enter());
        let events = poller.poll_once("tok", 8).await.unwrap();
        assert!(events.is_empty());
        poller.leave();
    }

    #[tokio::test]
    async fn zero_max_events_returns_immediately_without_network_call() {
        let (poller, transport) = poller();
        let events = poller.poll_once("tok", 0).await.unwrap();
        assert!(events.is_empty());
        assert!(transport.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn backoff_grows_and_resets() {
        let (poller, _t) = poller();
        poller.record_poll_failure(true);
        poller.record_poll_failure(true);
        assert_eq!(poller.next_interval_ms(false), BASE_INTERVAL_MS_DEFAULT * 4);
        poller.record_poll_success();
        assert_eq!(poller.next_interval_ms(false), BASE_INTERVAL_MS_DEFAULT);
    }

    #[tokio::test]
    async fn backoff_does_not_grow_without_remote_mode_stall() {
        let (poller, _t) = poller();
        poller.record_poll_failure(false);
        assert_eq!(poller.next_interval_ms(false), BASE_INTERVAL_MS_DEFAULT);
    }

    #[tokio::test]
    async fn backoff_caps_at_five_exponent() {
        let (poller, _t) = poller();
        for _ in 0..10 {
            poller.record_poll_failure(true);
        }
        assert_eq!(poller.next_interval_ms(false), MAX_BACKOFF_MS);
    }

    #[tokio::test]
    async fn pending_trust_floor_ignores_backoff() {
        let (poller, _t) = poller();
        for _ in 0..10 {
            poller.record_poll_failure(true);
        }
        assert_eq!(poller.next_interval_ms(true), PENDING_TRUST_INTERVAL_FLOOR_MS);
    }

    #[tokio::test]
    async fn friend_request_diffing_is_exactly_once_and_evicts_silently() {
        let (poller, _t) = poller();
        let first = poller.reconcile_friend_requests(&["carol".to_string()]).await;
        assert_eq!(first.len(), 1);
        let second = poller.reconcile_friend_requests(&["carol".to_string()]).await;
        assert!(second.is_empty(), "already-announced requester must not re-fire");
        let third = poller.reconcile_friend_requests(&[]).await;
        assert!(third.is_empty(), "eviction produces no event");
        let fourth = poller.reconcile_friend_requests(&["carol".to_string()]).await;
        assert_eq!(fourth.len(), 1, "carol re-appearing after eviction fires again");
    }

    #[tokio::test]
    async fn delivery_resolves_to_group_when_registered() {
        let (poller, transport) = poller();
        let message_id = MessageId::random();
        poller.register_group_pending_delivery(message_id, "g1").await;
        transport.set_default_responder(move |frame| {
            Ok(WireFrame::new(
                &frame.method,
                serde_json::to_vec(&PollResponse {
                    events: vec![WireEvent::Delivery {
                        from_username: "server-relay".into(),
                        message_id,
                    }],
                })
                .unwrap(),
            ))
        });
        let events = poller.poll_once("tok", 8).await.unwrap();
        match &events[0] {
            Event::Delivery { conversation_id, .. } => assert_eq!(*conversation_id, ConversationId::Group("g1".into())),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivery_without_registration_resolves_to_peer() {
        let (poller, transport) = poller();
        let message_id = MessageId::random();
        transport.set_default_responder(move |frame| {
            Ok(WireFrame::new(
                &frame.method,
                serde_json::to_vec(&PollResponse {
                    events: vec![WireEvent::Delivery {
                        from_username: "bob".into(),
                        message_id,
                    }],
                })
                .unwrap(),
            ))
        });
        let events = poller.poll_once("tok", 8).await.unwrap();
        match &events[0] {
            Event::Delivery { conversation_id, .. } => assert_eq!(*conversation_id, ConversationId::Peer("bob".into())),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn friend_sync_due_respects_interval_and_force_flag() {
        let (poller, transport) = poller();
        assert!(poller.friend_sync_due(0));
        transport.set_default_responder(|frame| Ok(WireFrame::new(&frame.method, serde_json::to_vec(&FriendSyncResponse { changed: true, friends: vec![] }).unwrap())));
        poller.sync_friends("tok", 1_000).await.unwrap();
        assert!(!poller.friend_sync_due(1_500));
        assert!(poller.friend_sync_due(1_000 + FRIEND_SYNC_INTERVAL_MS_DEFAULT as i64));
        poller.force_friend_sync();
        assert!(poller.friend_sync_due(1_500));
    }
}
