//! `TrustEngine` (§4.2): trust-on-first-use for server and peer identities,
//! plus SAS generation/verification for out-of-band confirmation.

use std::sync::Arc;

use tokio::sync::Mutex;

use mi_core::error::{Error, Result, TrustTarget};
use mi_core::ids::Fingerprint;
use mi_core::model::PendingTrust;
use mi_store::LocalStore;

fn endpoint_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

pub struct TrustEngine {
    store: Arc<Mutex<LocalStore>>,
    pending_server: Option<PendingTrust>,
    pending_peer: Option<PendingTrust>,
}

impl TrustEngine {
    pub fn new(store: Arc<Mutex<LocalStore>>) -> Self {
        TrustEngine {
            store,
            pending_server: None,
            pending_peer: None,
        }
    }

    pub fn has_pending_server(&self) -> bool {
        self.pending_server.is_some()
    }

    pub fn pending_server(&self) -> Option<&PendingTrust> {
        self.pending_server.as_ref()
    }

    pub fn has_pending_peer(&self) -> bool {
        self.pending_peer.is_some()
    }

    pub fn pending_peer(&self) -> Option<&PendingTrust> {
        self.pending_peer.as_ref()
    }

    /// Called after a server handshake presents `fingerprint` for
    /// `host:port`. Returns `Ok(())` when the presented fingerprint matches
    /// the stored pin (or when this is a first-run pin-on-trust with no
    /// existing pin and no conflicting pending prompt — it still raises a
    /// prompt per TOFU, so this path always returns `Err` on first contact).
    pub async fn observe_server(&mut self, host: &str, port: u16, fingerprint: Fingerprint) -> Result<()> {
        let endpoint = endpoint_key(host, port);
        let store = self.store.lock().await;
        if let Some(pin) = store.server_pin(&endpoint) {
            if pin.fingerprint == fingerprint {
                return Ok(());
            }
            drop(store);
            self.raise_pending_server(host, port, fingerprint, true);
            return Err(Error::TrustRequired(TrustTarget::Server));
        }
        drop(store);
        self.raise_pending_server(host, port, fingerprint, false);
        Err(Error::TrustRequired(TrustTarget::Server))
    }

    fn raise_pending_server(&mut self, host: &str, port: u16, fingerprint: Fingerprint, mismatch: bool) {
        // Invariant (§3): a racing handshake must never overwrite an existing
        // pending prompt, whether it presents the same fingerprint (harmless
        // re-raise) or a different one (the racing handshake is the one that
        // must wait). The existing prompt is left untouched either way; the
        // caller still surfaces `TrustRequired` for the rejected handshake.
        if self.pending_server.is_some() {
            return;
        }
        let pin_sas = mi_crypto::sas::derive_sas(&fingerprint);
        tracing::info!(host, port, mismatch, "server trust pending");
        self.pending_server = Some(PendingTrust::Server {
            host: host.to_string(),
            port,
            fingerprint,
            pin_sas,
            fingerprint_mismatch: mismatch,
        });
    }

    pub async fn trust_pending_server(&mut self, sas_input: &str) -> Result<()> {
        let Some(pending) = self.pending_server.clone() else {
            // Idempotent replay after a prior successful call.
            return Ok(());
        };
        let PendingTrust::Server {
            host,
            port,
            fingerprint,
            pin_sas,
            ..
        } = pending
        else {
            unreachable!("pending_server only ever holds PendingTrust::Server");
        };
        if !mi_crypto::sas::sas_matches(&pin_sas, sas_input) {
            return Err(Error::SasMismatch);
        }
        let endpoint = endpoint_key(&host, port);
        let now = chrono::Utc::now().timestamp();
        let mut store = self.store.lock().await;
        store
            .set_server_pin(&endpoint, fingerprint, now)
            .map_err(|e| crate::error::store_error("set_server_pin", e))?;
        drop(store);
        self.pending_server = None;
        Ok(())
    }

    pub async fn observe_peer(&mut self, username: &str, identity_pub: Vec<u8>, fingerprint: Fingerprint) -> Result<()> {
        let store = self.store.lock().await;
        if let Some(peer) = store.peer_identity(username) {
            if peer.fingerprint == fingerprint {
                return Ok(());
            }
            drop(store);
            self.raise_pending_peer(username, identity_pub, fingerprint, true);
            return Err(Error::TrustRequired(TrustTarget::Peer));
        }
        drop(store);
        self.raise_pending_peer(username, identity_pub, fingerprint, false);
        Err(Error::TrustRequired(TrustTarget::Peer))
    }

    fn raise_pending_peer(&mut self, username: &str, identity_pub: Vec<u8>, fingerprint: Fingerprint, mismatch: bool) {
        // Same non-overwrite invariant as `raise_pending_server`: a racing
        // handshake must not replace an existing pending peer prompt.
        if self.pending_peer.is_some() {
            return;
        }
        let pin_sas = mi_crypto::sas::derive_sas(&fingerprint);
        let _ = identity_pub; // stashed on confirm, not needed for the prompt itself
        tracing::info!(username, mismatch, "peer trust pending");
        self.pending_peer = Some(PendingTrust::Peer {
            username: username.to_string(),
            fingerprint,
            pin_sas,
            fingerprint_mismatch: mismatch,
        });
    }

    pub async fn trust_pending_peer(&mut self, sas_input: &str, identity_pub: Vec<u8>) -> Result<()> {
        let Some(pending) = self.pending_peer.clone() else {
            return Ok(());
        };
        let PendingTrust::Peer {
            username,
            fingerprint,
            pin_sas,
            ..
        } = pending
        else {
            unreachable!("pending_peer only ever holds PendingTrust::Peer");
        };
        if !mi_crypto::sas::sas_matches(&pin_sas, sas_input) {
            return Err(Error::SasMismatch);
        }
        let now = chrono::Utc::now().timestamp();
        let mut store = self.store.lock().await;
        store
            .set_peer_identity(&username, identity_pub, fingerprint, now)
            .map_err(|e| crate::error::store_error("set_peer_identity", e))?;
        drop(store);
        self.pending_peer = None;
        Ok(())
    }

    pub fn clear_pending_server(&mut self) {
        self.pending_server = None;
    }

    pub fn clear_pending_peer(&mut self) {
        self.pending_peer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mi_core::ids::Fingerprint;
    use tempfile::tempdir;

    async fn store() -> Arc<Mutex<LocalStore>> {
        let dir = tempdir().unwrap();
        // leak the tempdir for the duration of the test process; fine for
        // unit tests, avoided in integration tests via a held guard instead.
        let path = dir.into_path();
        Arc::new(Mutex::new(LocalStore::open(&path, "alice").unwrap()))
    }

    fn server_mismatch(pending: &PendingTrust) -> bool {
        match pending {
            PendingTrust::Server { fingerprint_mismatch, .. } => *fingerprint_mismatch,
            PendingTrust::Peer { fingerprint_mismatch, .. } => *fingerprint_mismatch,
        }
    }

    #[tokio::test]
    async fn first_contact_raises_pending_and_rejects() {
        let mut engine = TrustEngine::new(store().await);
        let fp = Fingerprint([7u8; 32]);
        let err = engine.observe_server("127.0.0.1", 9000, fp).await.unwrap_err();
        assert!(matches!(err, Error::TrustRequired(TrustTarget::Server)));
        assert!(engine.has_pending_server());
        assert!(!server_mismatch(engine.pending_server().unwrap()));
    }

    #[tokio::test]
    async fn trusting_with_correct_sas_pins_and_clears_pending() {
        let mut engine = TrustEngine::new(store().await);
        let fp = Fingerprint([7u8; 32]);
        engine.observe_server("127.0.0.1", 9000, fp).await.unwrap_err();
        let sas = engine.pending_server().unwrap().clone();
        let PendingTrust::Server { pin_sas, .. } = sas else { unreachable!() };
        engine.trust_pending_server(&pin_sas).await.unwrap();
        assert!(!engine.has_pending_server());
        // Second login attempt with the same fingerprint now succeeds silently.
        assert!(engine.observe_server("127.0.0.1", 9000, fp).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_sas_leaves_pending_intact() {
        let mut engine = TrustEngine::new(store().await);
        let fp = Fingerprint([7u8; 32]);
        engine.observe_server("127.0.0.1", 9000, fp).await.unwrap_err();
        let err = engine.trust_pending_server("0000-0000-0000-0000").await.unwrap_err();
        assert!(matches!(err, Error::SasMismatch));
        assert!(engine.has_pending_server());
    }

    #[tokio::test]
    async fn trust_pending_server_is_idempotent_on_replay() {
        let mut engine = TrustEngine::new(store().await);
        let fp = Fingerprint([7u8; 32]);
        engine.observe_server("127.0.0.1", 9000, fp).await.unwrap_err();
        let sas = engine.pending_server().unwrap().clone();
        let PendingTrust::Server { pin_sas, .. } = sas else { unreachable!() };
        engine.trust_pending_server(&pin_sas).await.unwrap();
        // Replaying the same call after success is a no-op, not an error.
        assert!(engine.trust_pending_server(&pin_sas).await.is_ok());
    }

    #[tokio::test]
    async fn mismatched_fingerprint_sets_mismatch_flag() {
        let mut engine = TrustEngine::new(store().await);
        let fp1 = Fingerprint([1u8; 32]);
        let fp2 = Fingerprint([2u8; 32]);
        engine.observe_server("127.0.0.1", 9000, fp1).await.unwrap_err();
        let sas = engine.pending_server().unwrap().clone();
        let PendingTrust::Server { pin_sas, .. } = sas else { unreachable!() };
        engine.trust_pending_server(&pin_sas).await.unwrap();

        engine.observe_server("127.0.0.1", 9000, fp2).await.unwrap_err();
        assert!(server_mismatch(engine.pending_server().unwrap()));
    }
}
