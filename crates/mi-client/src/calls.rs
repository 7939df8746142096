//! `GroupCallKeyAgent` (§4.5): per-(group, call) key-state machine and
//! signaling for group calls. Key material never touches disk and is
//! zeroized as soon as a call record is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::RngCore;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use mi_core::error::{Error, Result};
use mi_core::ids::CallId;
use mi_core::model::{CallSignalOp, MediaFlags};
use mi_transport::{Frame, Transport};

use crate::error::{decode_frame, encode_frame};
use crate::wire::CallSignalRequest;

const KEY_DELIVER_RETRY_SCHEDULE_MS: [u64; 3] = [500, 1500, 4500];
const CLOCK_SKEW_TOLERANCE_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    PendingKey,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDeliverOutcome {
    RetryAfterMs(u64),
    GiveUpAndRequestKey,
}

struct CallRecord {
    group_id: String,
    key_id: u32,
    members: HashSet<String>,
    #[allow(dead_code)]
    media_flags: MediaFlags,
    #[allow(dead_code)]
    started_at_ms: i64,
    state: CallState,
    owner: String,
    keys: HashMap<u32, Zeroizing<[u8; 32]>>,
    last_seen_seq: HashMap<String, u64>,
    stale_members: HashSet<String>,
    key_deliver_attempts: HashMap<String, u32>,
}

#[derive(Debug, Clone)]
pub struct CallSignalResult {
    pub call_id: CallId,
    pub key_id: u32,
    pub members: Vec<String>,
}

/// Holds one call's state machine: `PendingKey` while a joiner waits for
/// key material, `Active` once it holds the current `key_id`, `Ended` once
/// either side leaves (the record is then dropped, zeroizing its keys).
pub struct GroupCallKeyAgent {
    transport: Arc<dyn Transport>,
    local_username: String,
    calls: Mutex<HashMap<CallId, CallRecord>>,
}

impl GroupCallKeyAgent {
    pub fn new(transport: Arc<dyn Transport>, local_username: impl Into<String>) -> Self {
        GroupCallKeyAgent {
            transport,
            local_username: local_username.into(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn now_ts_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn send_request(&self, token: &str, op: CallSignalOp, group_id: &str, call_id: Option<CallId>, video: bool, key_id: u32, seq: u64, ts_ms: i64) -> Result<CallSignalResult> {
        let body = encode_frame(&CallSignalRequest {
            token: token.to_string(),
            op,
            group_id: group_id.to_string(),
            call_id,
            video,
            key_id,
            seq,
            ts_ms,
        })?;
        let frame = Frame::new("call_signal", body);
        let resp = self.transport.send_request(frame).await.map_err(|e| self.classify(e))?;
        let decoded: crate::wire::CallSignalResponse = decode_frame(&resp.body)?;
        Ok(CallSignalResult {
            call_id: decoded.call_id,
            key_id: decoded.key_id,
            members: decoded.members,
        })
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

    /// Mints a fresh `key_id = 1` and becomes the call's owner. `members`
    /// is the initial roster; the caller supplies it from the group roster
    /// it already tracks (this agent owns key distribution, not membership).
    pub async fn start_call(&self, group_id: &str, video: bool, members: &[String]) -> Result<(CallId, u32)> {
        if group_id.is_empty() {
            return Err(Error::invalid_argument("group_id"));
        }
        let call_id = CallId::random();
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        let mut member_set: HashSet<String> = members.iter().cloned().collect();
        member_set.insert(self.local_username.clone());
        let mut keys = HashMap::new();
        keys.insert(1u32, Zeroizing::new(key));
        let record = CallRecord {
            group_id: group_id.to_string(),
            key_id: 1,
            members: member_set,
            media_flags: MediaFlags::new(video),
            started_at_ms: Self::now_ts_ms(),
            state: CallState::Active,
            owner: self.local_username.clone(),
            keys,
            last_seen_seq: HashMap::new(),
            stale_members: HashSet::new(),
            key_deliver_attempts: HashMap::new(),
        };
        tracing::info!(group_id, call_id = %call_id, "group call started");
        self.calls.lock().await.insert(call_id, record);
        Ok((call_id, 1))
    }

    /// If no local record exists for `call_id`, requests the current key
    /// from the server and enters `PendingKey` until it arrives.
    pub async fn join_call(&self, token: &str, group_id: &str, call_id: CallId, video: bool) -> Result<u32> {
        {
            let mut calls = self.calls.lock().await;
            if let Some(record) = calls.get_mut(&call_id) {
                if record.group_id != group_id {
                    return Err(Error::invalid_argument("group_id"));
                }
                record.members.insert(self.local_username.clone());
                return Ok(record.key_id);
            }
        }
        let result = self.send_request(token, CallSignalOp::Accept, group_id, Some(call_id), video, 0, 0, Self::now_ts_ms()).await?;
        let mut calls = self.calls.lock().await;
        calls.insert(
            call_id,
            CallRecord {
                group_id: group_id.to_string(),
                key_id: result.key_id,
                members: result.members.into_iter().collect(),
                media_flags: MediaFlags::new(video),
                started_at_ms: Self::now_ts_ms(),
                state: CallState::PendingKey,
                owner: String::new(),
                keys: HashMap::new(),
                last_seen_seq: HashMap::new(),
                stale_members: HashSet::new(),
                key_deliver_attempts: HashMap::new(),
            },
        );
        Ok(result.key_id)
    }

    pub async fn leave_call(&self, group_id: &str, call_id: CallId) -> Result<()> {
        let mut calls = self.calls.lock().await;
        if let Some(record) = calls.get(&call_id) {
            if record.group_id != group_id {
                return Err(Error::invalid_argument("group_id"));
            }
        }
        if let Some(mut record) = calls.remove(&call_id) {
            record.keys.clear();
            record.state = CallState::Ended;
            tracing::info!(group_id, call_id = %call_id, "left group call");
        }
        Ok(())
    }

    pub async fn get_key(&self, group_id: &str, call_id: CallId, key_id: u32) -> Option<[u8; 32]> {
        let calls = self.calls.lock().await;
        let record = calls.get(&call_id)?;
        if record.group_id != group_id {
            return None;
        }
        record.keys.get(&key_id).map(|k| **k)
    }

    /// Only the call's owner may rotate; `new_key_id` must not regress.
    pub async fn rotate_key(&self, group_id: &str, call_id: CallId, new_key_id: u32, members: &[String]) -> Result<()> {
        let mut calls = self.calls.lock().await;
        let record = calls.get_mut(&call_id).ok_or_else(|| Error::invalid_argument("call_id"))?;
        if record.group_id != group_id {
            return Err(Error::invalid_argument("group_id"));
        }
        if record.owner != self.local_username {
            return Err(Error::Protocol("only the call owner may rotate keys".into()));
        }
        if new_key_id < record.key_id {
            return Err(Error::invalid_argument("new_key_id"));
        }
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        record.keys.insert(new_key_id, Zeroizing::new(key));
        record.key_id = new_key_id;
        record.members = members.iter().cloned().collect();
        record.key_deliver_attempts.clear();
        record.stale_members.clear();
        tracing::info!(group_id, call_id = %call_id, new_key_id, "rotated group call key");
        Ok(())
    }

    /// Asks each listed member to (re-)deliver `key_id`. The actual per-member
    /// asymmetric sealing happens on the server/`Crypto` side of the
    /// `KeyAdvertise`/`KeyDeliver` exchange; this agent only tracks who still
    /// needs it.
    pub async fn request_key(&self, token: &str, group_id: &str, call_id: CallId, key_id: u32) -> Result<()> {
        self.send_request(token, CallSignalOp::KeyAdvertise, group_id, Some(call_id), false, key_id, 0, Self::now_ts_ms()).await?;
        tracing::debug!(group_id, call_id = %call_id, key_id, "requested key redelivery");
        Ok(())
    }

    pub async fn send_signal(&self, token: &str, op: CallSignalOp, group_id: &str, call_id: Option<CallId>, video: bool, key_id: u32, seq: u64, ts_ms: i64) -> Result<CallSignalResult> {
        let result = self.send_request(token, op, group_id, call_id, video, key_id, seq, ts_ms).await?;
        if matches!(op, CallSignalOp::KeyDeliver) {
            let mut calls = self.calls.lock().await;
            if let Some(record) = calls.get_mut(&result.call_id) {
                record.members = result.members.iter().cloned().collect();
            }
        }
        Ok(result)
    }

    /// Drops an inbound signal older than or equal to `(call_id, sender)`'s
    /// last accepted `seq`, or one outside `CLOCK_SKEW_TOLERANCE_MS` of
    /// `now_ms`. Returns `true` when the signal should be processed.
    pub async fn accept_inbound_signal(&self, call_id: CallId, sender: &str, seq: u64, ts_ms: i64, now_ms: i64) -> bool {
        if (ts_ms - now_ms).abs() > CLOCK_SKEW_TOLERANCE_MS {
            tracing::warn!(sender, ts_ms, now_ms, "rejecting group call signal: clock skew too large");
            return false;
        }
        let mut calls = self.calls.lock().await;
        let Some(record) = calls.get_mut(&call_id) else {
            // No local record yet (e.g. the initial Invite): nothing to
            // replay-check against, so let it through.
            return true;
        };
        let last = record.last_seen_seq.get(sender).copied().unwrap_or(0);
        if seq <= last {
            tracing::warn!(sender, seq, last, "rejecting replayed group call signal");
            return false;
        }
        record.last_seen_seq.insert(sender.to_string(), seq);
        true
    }

    /// Schedules a retry or gives up and asks the sender to `RequestKey`
    /// (modeled here as `KeyAdvertise`) after three failed deliveries,
    /// marking the member stale for this call only.
    pub async fn record_key_deliver_failure(&self, call_id: CallId, member: &str) -> KeyDeliverOutcome {
        let mut calls = self.calls.lock().await;
        let Some(record) = calls.get_mut(&call_id) else {
            return KeyDeliverOutcome::GiveUpAndRequestKey;
        };
        let attempts = record.key_deliver_attempts.entry(member.to_string()).or_insert(0);
        *attempts += 1;
        if let Some(wait_ms) = KEY_DELIVER_RETRY_SCHEDULE_MS.get((*attempts - 1) as usize) {
            return KeyDeliverOutcome::RetryAfterMs(*wait_ms);
        }
        record.stale_members.insert(member.to_string());
        tracing::warn!(call_id = %call_id, member, "member marked stale after exhausting key delivery retries");
        KeyDeliverOutcome::GiveUpAndRequestKey
    }

    pub async fn is_member_stale(&self, call_id: CallId, member: &str) -> bool {
        self.calls.lock().await.get(&call_id).map(|r| r.stale_members.contains(member)).unwrap_or(false)
    }

    pub async fn call_state(&self, call_id: CallId) -> Option<CallState> {
        self.calls.lock().await.get(&call_id).map(|r| r.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mi_transport::test_support::MockTransport;

    fn agent() -> GroupCallKeyAgent {
        GroupCallKeyAgent::new(Arc::new(MockTransport::new()), "alice")
    }

    #[tokio::test]
    async fn start_call_mints_key_one_and_owns_it() {
        let agent = agent();
        let (call_id, key_id) = agent.start_call("group-1", true, &["bob".into()]).await.unwrap();
        assert_eq!(key_id, 1);
        let key = agent.get_key("group-1", call_id, 1).await;
        assert!(key.is_some());
        assert_eq!(agent.call_state(call_id).await, Some(CallState::Active));
    }

    #[tokio::test]
    async fn rotate_requires_ownership() {
        let agent = agent();
        let (call_id, _) = agent.start_call("group-1", false, &[]).await.unwrap();
        let err = GroupCallKeyAgent::new(Arc::new(MockTransport::new()), "mallory")
            .rotate_key("group-1", call_id, 2, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        // the owning agent can rotate its own record
        agent.rotate_key("group-1", call_id, 2, &["bob".into()]).await.unwrap();
        assert_eq!(agent.get_key("group-1", call_id, 2).await.map(|_| ()), Some(()));
    }

    #[tokio::test]
    async fn leave_clears_keys() {
        let agent = agent();
        let (call_id, _) = agent.start_call("group-1", false, &[]).await.unwrap();
        agent.leave_call("group-1", call_id).await.unwrap();
        assert!(agent.get_key("group-1", call_id, 1).await.is_none());
    }

    #[tokio::test]
    async fn replayed_seq_is_rejected() {
        let agent = agent();
        let (call_id, _) = agent.start_call("group-1", false, &["bob".into()]).await.unwrap();
        let now = GroupCallKeyAgent::now_ts_ms();
        assert!(agent.accept_inbound_signal(call_id, "bob", 5, now, now).await);
        assert!(!agent.accept_inbound_signal(call_id, "bob", 5, now, now).await);
        assert!(!agent.accept_inbound_signal(call_id, "bob", 3, now, now).await);
        assert!(agent.accept_inbound_signal(call_id, "bob", 6, now, now).await);
    }

    #[tokio::test]
    async fn clock_skew_outside_tolerance_is_rejected() {
        let agent = agent();
        let (call_id, _) = agent.start_call("group-1", false, &["bob".into()]).await.unwrap();
        let now = GroupCallKeyAgent::now_ts_ms();
        assert!(!agent.accept_inbound_signal(call_id, "bob", 1, now - 60_000, now).await);
    }

    #[tokio::test]
    async fn key_deliver_failure_follows_retry_schedule_then_gives_up() {
        let agent = agent();
        let (call_id, _) = agent.start_call("group-1", false, &["bob".into()]).await.unwrap();
        assert_eq!(agent.record_key_deliver_failure(call_id, "bob").await, KeyDeliverOutcome::RetryAfterMs(500));
        assert_eq!(agent.record_key_deliver_failure(call_id, "bob").await, KeyDeliverOutcome::RetryAfterMs(1500));
        assert_eq!(agent.record_key_deliver_failure(call_id, "bob").await, KeyDeliverOutcome::RetryAfterMs(4500));
        assert_eq!(agent.record_key_deliver_failure(call_id, "bob").await, KeyDeliverOutcome::GiveUpAndRequestKey);
        assert!(agent.is_member_stale(call_id, "bob").await);
    }
}
