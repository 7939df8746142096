//! `MediaRelay` (§4.6): a mailbox for encrypted media frames between peers
//! or group-call participants.
//!
//! Per-call state lives behind its own `tokio::sync::Mutex`, independent of
//! the session mutex described in §5 — producers (inbound network) and
//! consumers (`pull`) run on different tasks and must never contend with
//! send/poll traffic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Notify};

use mi_core::ids::CallId;

const MEDIA_ROOT_DOMAIN_TAG: &[u8] = b"MI_MEDIA_ROOT_V1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub sender: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct MediaRelayConfig {
    pub audio_max_frames: usize,
    pub video_max_frames: usize,
}

impl Default for MediaRelayConfig {
    fn default() -> Self {
        MediaRelayConfig {
            audio_max_frames: 200,
            video_max_frames: 64,
        }
    }
}

struct Subscription {
    #[allow(dead_code)]
    is_group: bool,
    #[allow(dead_code)]
    group_id: Option<String>,
}

struct CallQueue {
    items: VecDeque<(MediaKind, MediaPacket)>,
    notify: Arc<Notify>,
}

impl CallQueue {
    fn new() -> Self {
        CallQueue {
            items: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// Per-call bounded jitter queues plus the subscription set the Facade uses
/// to declare interest before any packets for a call are accepted.
pub struct MediaRelay {
    config: MediaRelayConfig,
    queues: Mutex<HashMap<CallId, CallQueue>>,
    subscriptions: Mutex<HashMap<CallId, Subscription>>,
}

impl MediaRelay {
    pub fn new(config: MediaRelayConfig) -> Self {
        MediaRelay {
            config,
            queues: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic from the active session key, `call_id`, and a domain
    /// tag. The active session key itself is whatever key material the
    /// caller's `SessionManager`/ratchet currently holds for `peer_or_group`.
    pub fn derive_media_root(&self, session_key: &[u8; 32], peer_or_group: &str, call_id: CallId) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(MEDIA_ROOT_DOMAIN_TAG);
        hasher.update(session_key);
        hasher.update(peer_or_group.as_bytes());
        hasher.update(call_id.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    pub async fn add_subscription(&self, call_id: CallId, is_group: bool, group_id: Option<String>) {
        self.subscriptions.lock().await.insert(call_id, Subscription { is_group, group_id });
        self.queues.lock().await.entry(call_id).or_insert_with(CallQueue::new);
        tracing::debug!(call_id = %call_id, is_group, "media subscription added");
    }

    pub async fn clear_subscriptions(&self) {
        self.subscriptions.lock().await.clear();
        tracing::debug!("media subscriptions cleared");
    }

    /// Bounded, non-blocking enqueue. Always returns — overflow silently
    /// drops the oldest frame of the same kind, matching UDP-like semantics
    /// the caller cannot (and should not) distinguish from a clean enqueue.
    pub async fn push(&self, call_id: CallId, kind: MediaKind, sender: impl Into<String>, payload: Vec<u8>) {
        if !self.subscriptions.lock().await.contains_key(&call_id) {
            tracing::trace!(call_id = %call_id, "dropping media packet: no subscription");
            return;
        }
        let bound = match kind {
            MediaKind::Audio => self.config.audio_max_frames,
            MediaKind::Video => self.config.video_max_frames,
        };
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(call_id).or_insert_with(CallQueue::new);
        let same_kind = queue.items.iter().filter(|(k, _)| *k == kind).count();
        if same_kind >= bound {
            if let Some(pos) = queue.items.iter().position(|(k, _)| *k == kind) {
                queue.items.remove(pos);
            }
        }
        queue.items.push_back((kind, MediaPacket { sender: sender.into(), payload }));
        queue.notify.notify_waiters();
    }

    /// Blocks up to `wait_ms` until at least one packet is available, then
    /// drains up to `max_packets` in FIFO order across both kinds.
    /// `wait_ms == 0` never blocks.
    pub async fn pull(&self, call_id: CallId, max_packets: usize, wait_ms: u64) -> Vec<MediaPacket> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
        loop {
            let notify = {
                let mut queues = self.queues.lock().await;
                let queue = queues.entry(call_id).or_insert_with(CallQueue::new);
                if !queue.items.is_empty() {
                    let n = queue.items.len().min(max_packets);
                    return queue.items.drain(..n).map(|(_, packet)| packet).collect();
                }
                queue.notify.clone()
            };
            if wait_ms == 0 {
                return Vec::new();
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Vec::new();
            }
            let _ = tokio::time::timeout(deadline - now, notify.notified()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pull_with_zero_wait_never_blocks_on_empty_queue() {
        let relay = MediaRelay::new(MediaRelayConfig::default());
        let call_id = CallId::random();
        relay.add_subscription(call_id, false, None).await;
        let packets = relay.pull(call_id, 10, 0).await;
        assert!(packets.is_empty());
    }

    #[tokio::test]
    async fn push_without_subscription_is_dropped() {
        let relay = MediaRelay::new(MediaRelayConfig::default());
        let call_id = CallId::random();
        relay.push(call_id, MediaKind::Audio, "bob", vec![1, 2, 3]).await;
        let packets = relay.pull(call_id, 10, 0).await;
        assert!(packets.is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_preserves_order() {
        let relay = MediaRelay::new(MediaRelayConfig {
            audio_max_frames: 200,
            video_max_frames: 4,
        });
        let call_id = CallId::random();
        relay.add_subscription(call_id, true, Some("g1".into())).await;
        for i in 1..=5u8 {
            relay.push(call_id, MediaKind::Video, "bob", vec![i]).await;
        }
        let packets = relay.pull(call_id, 10, 0).await;
        let payloads: Vec<u8> = packets.iter().map(|p| p.payload[0]).collect();
        assert_eq!(payloads, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn pull_unblocks_promptly_when_a_push_lands() {
        let relay = Arc::new(MediaRelay::new(MediaRelayConfig::default()));
        let call_id = CallId::random();
        relay.add_subscription(call_id, false, None).await;

        let relay2 = relay.clone();
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            relay2.push(call_id, MediaKind::Audio, "bob", vec![9]).await;
        });

        let started = tokio::time::Instant::now();
        let packets = relay.pull(call_id, 10, 2000).await;
        producer.await.unwrap();

        assert_eq!(packets.len(), 1);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn media_root_is_deterministic_and_domain_separated() {
        let relay = MediaRelay::new(MediaRelayConfig::default());
        let call_id = CallId::random();
        let key = [7u8; 32];
        let a = relay.derive_media_root(&key, "g1", call_id);
        let b = relay.derive_media_root(&key, "g1", call_id);
        let c = relay.derive_media_root(&key, "g2", call_id);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[allow(dead_code)]
    fn unused_hashset_marker() -> HashSet<u8> {
        HashSet::new()
    }
}
