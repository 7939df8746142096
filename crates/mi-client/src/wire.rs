//! Request/response payload shapes carried inside `mi_transport::Frame`.
//!
//! The wire transport itself (TCP/TLS/KCP framing) is out of scope per §1;
//! this module only defines the JSON bodies this client places into and
//! reads out of a `Frame`, so every component has one serialization
//! boundary instead of hand-rolling byte layouts per call site.

use serde::{Deserialize, Serialize};

use mi_core::ids::{CallId, DeviceId, MessageId};
use mi_core::model::{CallSignalOp, GroupMemberRole};

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub verifier: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub pake_message: Vec<u8>,
    pub device_id: DeviceId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {}

#[derive(Debug, Serialize, Deserialize)]
pub struct SealedWire {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendRequest {
    pub token: String,
    pub conversation_id: String,
    pub is_group: bool,
    pub message_id: MessageId,
    pub sealed: SealedWire,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollRequest {
    pub token: String,
    pub max_events: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub events: Vec<WireEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireEvent {
    IncomingText {
        from_username: String,
        message_id: MessageId,
        text: String,
    },
    IncomingFile {
        from_username: String,
        message_id: MessageId,
        file_id: String,
        file_key: [u8; 32],
        file_name: String,
        file_size: u64,
    },
    IncomingSticker {
        from_username: String,
        message_id: MessageId,
        sticker_id: String,
    },
    GroupText {
        group_id: String,
        from_username: String,
        message_id: MessageId,
        text: String,
    },
    GroupFile {
        group_id: String,
        from_username: String,
        message_id: MessageId,
        file_id: String,
        file_key: [u8; 32],
        file_name: String,
        file_size: u64,
    },
    GroupInvite {
        group_id: String,
        from_username: String,
        message_id: MessageId,
    },
    GroupNotice {
        group_id: String,
        actor_username: String,
        target_username: Option<String>,
        role: Option<GroupMemberRole>,
    },
    Delivery {
        from_username: String,
        message_id: MessageId,
    },
    ReadReceipt {
        from_username: String,
        message_id: MessageId,
    },
    Typing {
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
    GroupCallSignal {
        group_id: String,
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

#[derive(Debug, Serialize, Deserialize)]
pub struct FriendSyncRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FriendSyncResponse {
    pub changed: bool,
    pub friends: Vec<FriendWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendWire {
    pub username: String,
    pub remark: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallSignalRequest {
    pub token: String,
    pub op: CallSignalOp,
    pub group_id: String,
    pub call_id: Option<CallId>,
    pub video: bool,
    pub key_id: u32,
    pub seq: u64,
    pub ts_ms: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallSignalResponse {
    pub call_id: CallId,
    pub key_id: u32,
    pub members: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingBeginPrimaryRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingBeginPrimaryResponse {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingPollRequestsRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequestWire {
    pub device_id: DeviceId,
    pub request_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingPollRequestsResponse {
    pub requests: Vec<PairingRequestWire>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingApproveRequest {
    pub token: String,
    pub device_id: DeviceId,
    pub request_id: String,
    pub sealed_identity: SealedWire,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingApproveResponse {}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingBeginLinkedRequest {
    pub token: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingBeginLinkedResponse {}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingPollLinkedRequest {
    pub token: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingPollLinkedResponse {
    pub completed: bool,
    pub sealed_identity: Option<SealedWire>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingCancelRequest {
    pub token: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingCancelResponse {}

/// The plaintext carried inside `PairingApproveRequest::sealed_identity` /
/// `PairingPollLinkedResponse::sealed_identity`. Sealed symmetrically under
/// a key derived from the pairing code both sides already share
/// out-of-band, since the primary-to-asymmetric-identity-key sealing named
/// in §4.9 is a detail of the `Crypto` backend, not this wire shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct PairingIdentityPayload {
    pub device_id: DeviceId,
    pub identity_pub: Vec<u8>,
    pub identity_priv: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenericRequest {
    pub token: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenericResponse {
    pub result: serde_json::Value,
}
