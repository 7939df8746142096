//! Data model shared across the workspace: identity, trust, messages, group
//! calls, and the typed events the `EventPoller` produces.
//!
//! Mirrors spec §3 exactly; see `mi-core::ids` for the composite identifier
//! types that replace the source's `"conv|mid"` string-concatenation keys.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, DeviceId, Fingerprint, MessageId};

/// A conversation is either a 1:1 peer or a group, modeled as a sum type
/// instead of the source's `(String, is_group: bool)` pair (REDESIGN FLAGS).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationId {
    Peer(String),
    Group(String),
}

impl ConversationId {
    pub fn is_group(&self) -> bool {
        matches!(self, ConversationId::Group(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConversationId::Peer(s) | ConversationId::Group(s) => s,
        }
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationId::Peer(u) => write!(f, "peer:{u}"),
            ConversationId::Group(g) => write!(f, "group:{g}"),
        }
    }
}

// ---------------------------------------------------------------------
// Trust
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerPin {
    pub fingerprint: Fingerprint,
    pub trusted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub identity_pub: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub trusted_at: i64,
    pub last_seen_fingerprint: Fingerprint,
}

/// A transient prompt awaiting user confirmation. At most one of each kind
/// may exist at a time — enforced by `TrustEngine`, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PendingTrust {
    Server {
        host: String,
        port: u16,
        fingerprint: Fingerprint,
        pin_sas: String,
        /// Set when a *different* pin already exists for this endpoint.
        fingerprint_mismatch: bool,
    },
    Peer {
        username: String,
        fingerprint: Fingerprint,
        pin_sas: String,
        fingerprint_mismatch: bool,
    },
}

// ---------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    File,
    Sticker,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePayload {
    Text {
        text: String,
        reply_to: Option<MessageId>,
        /// First 80 chars of `text`, precomputed for UI preview.
        preview: String,
    },
    File {
        file_id: String,
        file_key: [u8; 32],
        file_name: String,
        file_size: u64,
    },
    Sticker {
        sticker_id: String,
    },
    System {
        notice: String,
    },
}

impl MessagePayload {
    pub fn text(text: impl Into<String>, reply_to: Option<MessageId>) -> Self {
        let text = text.into();
        let preview: String = text.chars().take(80).collect();
        MessagePayload::Text {
            text,
            reply_to,
            preview,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Text { .. } => MessageKind::Text,
            MessagePayload::File { .. } => MessageKind::File,
            MessagePayload::Sticker { .. } => MessageKind::Sticker,
            MessagePayload::System { .. } => MessageKind::System,
        }
    }
}

/// `Pending -> Sent -> {Delivered -> Read} | Failed`; `Failed` may re-enter
/// `Pending`; `Read` is terminal; a reordered `Delivered` after `Read` is
/// ignored by the caller applying the transition (see `Message::apply_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Whether `next` is a legal transition from `self`, per the DAG in §3.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, next) {
            (Pending, Sent) => true,
            (Pending, Failed) => true,
            (Sent, Delivered) => true,
            (Sent, Read) => true,
            (Sent, Failed) => true,
            (Delivered, Read) => true,
            (Failed, Pending) => true,
            // Read is terminal; an out-of-order Delivered after Read is
            // ignored rather than rejected.
            (Read, Delivered) => false,
            (same, next) if same == next => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub outgoing: bool,
    pub payload: MessagePayload,
    pub status: MessageStatus,
    pub timestamp_sec: i64,
    /// Populated for incoming group messages.
    pub sender: Option<String>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn is_group(&self) -> bool {
        self.conversation_id.is_group()
    }

    /// Apply a status transition, silently ignoring a `Delivered` that
    /// arrives after `Read` (§3: "may arrive after Read out of order and is
    /// then ignored").
    pub fn apply_status(&mut self, next: MessageStatus) {
        if self.status == MessageStatus::Read && next == MessageStatus::Delivered {
            return;
        }
        if self.status.can_transition_to(next) {
            self.status = next;
        }
    }
}

// ---------------------------------------------------------------------
// PendingOutgoing
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingKind {
    Text,
    ReplyText,
    Location,
    ContactCard,
    Sticker,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOutgoingEntry {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub kind: PendingKind,
    pub body: Vec<u8>,
    pub attempts: u32,
    pub last_attempt_ms: i64,
}

// ---------------------------------------------------------------------
// Group calls
// ---------------------------------------------------------------------

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MediaFlags: u8 {
        const AUDIO = 0b01;
        const VIDEO = 0b10;
    }
}

impl MediaFlags {
    pub fn new(video: bool) -> Self {
        if video { Self::AUDIO | Self::VIDEO } else { Self::AUDIO }
    }

    pub fn has_video(self) -> bool {
        self.contains(Self::VIDEO)
    }
}

#[derive(Debug, Clone)]
pub struct GroupCall {
    pub call_id: CallId,
    pub group_id: String,
    pub key_id: u32,
    pub members: HashSet<String>,
    pub media_flags: MediaFlags,
    pub started_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallSignalOp {
    Invite,
    Accept,
    Decline,
    Leave,
    KeyAdvertise,
    KeyDeliver,
    Hangup,
}

// ---------------------------------------------------------------------
// Friendship / devices / groups (host API value types)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendEntry {
    pub username: String,
    pub remark: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestEntry {
    pub requester_username: String,
    pub requester_remark: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupMemberRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMemberInfo {
    pub username: String,
    pub role: GroupMemberRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub label: String,
    pub last_seen_ms: i64,
}

// ---------------------------------------------------------------------
// Typed events produced by EventPoller
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Event {
    IncomingText {
        conversation_id: ConversationId,
        from_username: String,
        message_id: MessageId,
        text: String,
    },
    IncomingFile {
        conversation_id: ConversationId,
        from_username: String,
        message_id: MessageId,
        file_id: String,
        file_key: [u8; 32],
        file_name: String,
        file_size: u64,
    },
    IncomingSticker {
        conversation_id: ConversationId,
        from_username: String,
        message_id: MessageId,
        sticker_id: String,
    },
    GroupText {
        conversation_id: ConversationId,
        from_username: String,
        message_id: MessageId,
        text: String,
    },
    GroupFile {
        conversation_id: ConversationId,
        from_username: String,
        message_id: MessageId,
        file_id: String,
        file_key: [u8; 32],
        file_name: String,
        file_size: u64,
    },
    GroupInvite {
        conversation_id: ConversationId,
        from_username: String,
        message_id: MessageId,
    },
    GroupNotice {
        conversation_id: ConversationId,
        actor_username: String,
        target_username: Option<String>,
        role: Option<GroupMemberRole>,
    },
    Delivery {
        conversation_id: ConversationId,
        from_username: String,
        message_id: MessageId,
    },
    ReadReceipt {
        conversation_id: ConversationId,
        from_username: String,
        message_id: MessageId,
    },
    Typing {
        conversation_id: ConversationId,
        from_username: String,
        typing: bool,
    },
    Presence {
        from_username: String,
        online: bool,
    },
    FriendRequest {
        requester_username: String,
    },
    OutgoingSync {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    GroupCallSignal {
        conversation_id: ConversationId,
        op: CallSignalOp,
        call_id: CallId,
        key_id: u32,
        sender: String,
        seq: u64,
        ts_ms: i64,
    },
    OfflinePayload {
        bytes: Vec<u8>,
    },
}

impl Event {
    /// The conversation id this event should be routed against, if any.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Event::IncomingText { conversation_id, .. }
            | Event::IncomingFile { conversation_id, .. }
            | Event::IncomingSticker { conversation_id, .. }
            | Event::GroupText { conversation_id, .. }
            | Event::GroupFile { conversation_id, .. }
            | Event::GroupInvite { conversation_id, .. }
            | Event::GroupNotice { conversation_id, .. }
            | Event::Delivery { conversation_id, .. }
            | Event::ReadReceipt { conversation_id, .. }
            | Event::Typing { conversation_id, .. }
            | Event::OutgoingSync { conversation_id, .. }
            | Event::GroupCallSignal { conversation_id, .. } => Some(conversation_id),
            Event::Presence { .. } | Event::FriendRequest { .. } | Event::OfflinePayload { .. } => {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------
// Capability bitfield / version (§6)
// ---------------------------------------------------------------------

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Capabilities: u8 {
        const CHAT = 1 << 0;
        const GROUP = 1 << 1;
        const MEDIA = 1 << 2;
        const GROUP_CALL = 1 << 3;
        const OFFLINE = 1 << 4;
        const DEVICE_SYNC = 1 << 5;
        const KCP = 1 << 6;
        const OPAQUE = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub abi: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_the_dag() {
        use MessageStatus::*;
        assert!(Pending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Read));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Read.can_transition_to(Delivered));
    }

    #[test]
    fn reordered_delivered_after_read_is_ignored() {
        let mut msg = Message {
            message_id: MessageId::random(),
            conversation_id: ConversationId::Peer("bob".into()),
            outgoing: true,
            payload: MessagePayload::text("hi", None),
            status: MessageStatus::Read,
            timestamp_sec: 0,
            sender: None,
        };
        msg.apply_status(MessageStatus::Delivered);
        assert_eq!(msg.status, MessageStatus::Read);
    }

    #[test]
    fn capabilities_bitfield_matches_spec_bit_order() {
        let caps = Capabilities::CHAT | Capabilities::GROUP_CALL;
        assert!(caps.contains(Capabilities::CHAT));
        assert!(caps.contains(Capabilities::GROUP_CALL));
        assert!(!caps.contains(Capabilities::MEDIA));
        assert_eq!(Capabilities::GROUP_CALL.0, 0b0000_1000);
    }
}
