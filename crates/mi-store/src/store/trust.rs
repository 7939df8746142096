//! `pins.log`: the two trust mappings from §3 — `server_pins` and
//! `peer_identities` — plus the append-only event log that backs them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mi_core::ids::Fingerprint;
use mi_core::model::{PeerIdentity, ServerPin};
use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
enum PinEvent {
    #[serde(rename = "pin_added")]
    ServerAdded { endpoint: String, fingerprint: Fingerprint, trusted_at: i64 },
    #[serde(rename = "pin_replaced")]
    ServerReplaced { endpoint: String, fingerprint: Fingerprint, trusted_at: i64 },
    #[serde(rename = "pin_revoked")]
    ServerRevoked { endpoint: String },
    #[serde(rename = "peer_pin_added")]
    PeerAdded {
        username: String,
        identity_pub: Vec<u8>,
        fingerprint: Fingerprint,
        trusted_at: i64,
    },
    #[serde(rename = "peer_pin_replaced")]
    PeerReplaced {
        username: String,
        identity_pub: Vec<u8>,
        fingerprint: Fingerprint,
        trusted_at: i64,
    },
    #[serde(rename = "peer_pin_revoked")]
    PeerRevoked { username: String },
}

pub struct TrustStore {
    path: PathBuf,
    server_pins: HashMap<String, ServerPin>,
    peer_identities: HashMap<String, PeerIdentity>,
}

impl TrustStore {
    pub fn open(account_dir: &Path) -> Result<Self> {
        let path = account_dir.join("pins.log");
        let mut store = TrustStore {
            path,
            server_pins: HashMap::new(),
            peer_identities: HashMap::new(),
        };
        store.replay()?;
        Ok(store)
    }

    fn replay(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        for line in contents.lines().filter(|l| !l.is_empty()) {
            let event: PinEvent = serde_json::from_str(line)?;
            self.apply(event);
        }
        Ok(())
    }

    fn apply(&mut self, event: PinEvent) {
        match event {
            PinEvent::ServerAdded { endpoint, fingerprint, trusted_at }
            | PinEvent::ServerReplaced { endpoint, fingerprint, trusted_at } => {
                self.server_pins.insert(endpoint, ServerPin { fingerprint, trusted_at });
            }
            PinEvent::ServerRevoked { endpoint } => {
                self.server_pins.remove(&endpoint);
            }
            PinEvent::PeerAdded {
                username,
                identity_pub,
                fingerprint,
                trusted_at,
            }
            | PinEvent::PeerReplaced {
                username,
                identity_pub,
                fingerprint,
                trusted_at,
            } => {
                self.peer_identities.insert(
                    username,
                    PeerIdentity {
                        identity_pub,
                        fingerprint,
                        trusted_at,
                        last_seen_fingerprint: fingerprint,
                    },
                );
            }
            PinEvent::PeerRevoked { username } => {
                self.peer_identities.remove(&username);
            }
        }
    }

    fn append(&self, event: &PinEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        atomic::append_line(&self.path, &line)
    }

    pub fn server_pin(&self, endpoint: &str) -> Option<&ServerPin> {
        self.server_pins.get(endpoint)
    }

    pub fn set_server_pin(&mut self, endpoint: &str, fingerprint: Fingerprint, trusted_at: i64) -> Result<()> {
        let event = if self.server_pins.contains_key(endpoint) {
            PinEvent::ServerReplaced {
                endpoint: endpoint.to_string(),
                fingerprint,
                trusted_at,
            }
        } else {
            PinEvent::ServerAdded {
                endpoint: endpoint.to_string(),
                fingerprint,
                trusted_at,
            }
        };
        self.append(&event)?;
        self.apply(event);
        Ok(())
    }

    pub fn peer_identity(&self, username: &str) -> Option<&PeerIdentity> {
        self.peer_identities.get(username)
    }

    pub fn set_peer_identity(
        &mut self,
        username: &str,
        identity_pub: Vec<u8>,
        fingerprint: Fingerprint,
        trusted_at: i64,
    ) -> Result<()> {
        let event = if self.peer_identities.contains_key(username) {
            PinEvent::PeerReplaced {
                username: username.to_string(),
                identity_pub,
                fingerprint,
                trusted_at,
            }
        } else {
            PinEvent::PeerAdded {
                username: username.to_string(),
                identity_pub,
                fingerprint,
                trusted_at,
            }
        };
        self.append(&event)?;
        self.apply(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pins_persist_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = TrustStore::open(dir.path()).unwrap();
            store
                .set_server_pin("127.0.0.1:9000", Fingerprint([1u8; 32]), 100)
                .unwrap();
        }
        let store = TrustStore::open(dir.path()).unwrap();
        assert_eq!(store.server_pin("127.0.0.1:9000").unwrap().fingerprint, Fingerprint([1u8; 32]));
    }

    #[test]
    fn replacing_a_pin_overwrites_not_duplicates() {
        let dir = tempdir().unwrap();
        let mut store = TrustStore::open(dir.path()).unwrap();
        store.set_server_pin("h:1", Fingerprint([1u8; 32]), 1).unwrap();
        store.set_server_pin("h:1", Fingerprint([2u8; 32]), 2).unwrap();
        assert_eq!(store.server_pin("h:1").unwrap().fingerprint, Fingerprint([2u8; 32]));
    }
}
