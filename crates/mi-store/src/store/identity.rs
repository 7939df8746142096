//! `identity.bin`: long-term identity key material and the persisted
//! `device_id`, wrapped by the platform secure-store envelope (§4.7).
//!
//! The platform secure-store backend itself (Keychain / Secret Service /
//! DPAPI / TPM) is out of scope per spec §1 and consumed only through the
//! already-resolved wrapping key the host supplies to `LocalStore::open`.

use std::path::{Path, PathBuf};

use mi_core::ids::DeviceId;
use mi_crypto::{Crypto, Envelope};
use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub device_id: DeviceId,
    pub identity_pub: Vec<u8>,
    pub identity_priv: Vec<u8>,
}

pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(account_dir: &Path) -> Self {
        IdentityStore {
            path: account_dir.join("identity.bin"),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self, crypto: &dyn Crypto, wrapping_key: &[u8; 32]) -> Result<Option<IdentityRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&self.path)?;
        let envelope = Envelope::from_bytes(&data)?;
        let plain = envelope.unwrap(crypto, wrapping_key, b"identity.bin")?;
        let record: IdentityRecord = serde_json::from_slice(&plain)?;
        Ok(Some(record))
    }

    /// Created once on first successful registration (§3 lifecycle);
    /// overwritten only by explicit account wipe at a higher layer.
    pub fn save(&self, crypto: &dyn Crypto, wrapping_key: &[u8; 32], record: &IdentityRecord) -> Result<()> {
        let plain = serde_json::to_vec(record)?;
        let envelope = Envelope::wrap(crypto, wrapping_key, b"identity.bin", &plain)?;
        atomic::atomic_write(&self.path, &envelope.to_bytes())?;
        Ok(())
    }

    pub fn wipe(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mi_crypto::test_support::InMemoryCrypto;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let crypto = InMemoryCrypto::new();
        let key = [4u8; 32];
        let store = IdentityStore::new(dir.path());
        assert!(!store.exists());

        let record = IdentityRecord {
            device_id: DeviceId::random(),
            identity_pub: vec![1, 2, 3],
            identity_priv: vec![4, 5, 6],
        };
        store.save(&crypto, &key, &record).unwrap();
        assert!(store.exists());

        let loaded = store.load(&crypto, &key).unwrap().unwrap();
        assert_eq!(loaded.device_id, record.device_id);
        assert_eq!(loaded.identity_priv, record.identity_priv);
    }
}
