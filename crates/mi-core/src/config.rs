//! INI-format client configuration (§6) and data-directory resolution.
//!
//! Unlike the teacher's `config`+`dotenvy`+global-`OnceLock` pattern (which
//! fits one process-wide server config), `ClientConfig::load` returns an
//! owned value: a host process may run more than one `Facade` (e.g. two
//! test clients talking to each other), so configuration cannot be a
//! process-global singleton here.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    Opaque,
    Password,
}

#[derive(Debug, Clone)]
pub struct ClientSection {
    pub server_ip: String,
    pub server_port: u16,
    pub use_tls: bool,
    pub require_tls: bool,
    pub require_pinned_fingerprint: bool,
    pub auth_mode: AuthMode,
    pub pinned_fingerprint: Option<[u8; 32]>,
}

#[derive(Debug, Clone)]
pub struct KtSection {
    pub require_signature: bool,
    pub root_pubkey_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSyncRole {
    Primary,
    Linked,
}

#[derive(Debug, Clone)]
pub struct DeviceSyncSection {
    pub enabled: bool,
    pub role: DeviceSyncRole,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client: ClientSection,
    pub kt: KtSection,
    pub device_sync: DeviceSyncSection,
}

fn parse_bool01(value: Option<&str>, field: &str) -> Result<bool> {
    match value {
        None => Ok(false),
        Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(_) => Err(Error::invalid_argument(field)),
    }
}

impl ClientConfig {
    /// Parse `[section]key=value` INI content at `path`. Paths in the `[kt]`
    /// section are resolved relative to `path`'s parent directory.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("reading config {}: {e}", path.display())))?;
        Self::parse(&contents, path.parent().unwrap_or_else(|| Path::new(".")))
    }

    pub fn parse(contents: &str, base_dir: &Path) -> Result<Self> {
        let ini = ini::Ini::load_from_str(contents)
            .map_err(|e| Error::invalid_argument(format!("config parse error: {e}")))?;

        let client_sec = ini.section(Some("client"));
        let server_ip = client_sec
            .and_then(|s| s.get("server_ip"))
            .ok_or_else(|| Error::invalid_argument("client.server_ip"))?
            .to_string();
        let server_port: u16 = client_sec
            .and_then(|s| s.get("server_port"))
            .ok_or_else(|| Error::invalid_argument("client.server_port"))?
            .parse()
            .map_err(|_| Error::invalid_argument("client.server_port"))?;
        if server_port == 0 {
            return Err(Error::invalid_argument("client.server_port"));
        }
        let use_tls = parse_bool01(client_sec.and_then(|s| s.get("use_tls")), "client.use_tls")?;
        let require_tls = parse_bool01(
            client_sec.and_then(|s| s.get("require_tls")),
            "client.require_tls",
        )?;
        let require_pinned_fingerprint = parse_bool01(
            client_sec.and_then(|s| s.get("require_pinned_fingerprint")),
            "client.require_pinned_fingerprint",
        )?;
        let auth_mode = match client_sec.and_then(|s| s.get("auth_mode")).unwrap_or("opaque") {
            "opaque" => AuthMode::Opaque,
            "password" => AuthMode::Password,
            _ => return Err(Error::invalid_argument("client.auth_mode")),
        };
        let pinned_fingerprint = match client_sec.and_then(|s| s.get("pinned_fingerprint")) {
            None => None,
            Some(hexstr) => {
                let mut buf = [0u8; 32];
                hex::decode_to_slice(hexstr, &mut buf)
                    .map_err(|_| Error::invalid_argument("client.pinned_fingerprint"))?;
                Some(buf)
            }
        };

        let kt_sec = ini.section(Some("kt"));
        let kt_require_signature = parse_bool01(
            kt_sec.and_then(|s| s.get("require_signature")),
            "kt.require_signature",
        )?;
        let root_pubkey_path = kt_sec
            .and_then(|s| s.get("root_pubkey_path"))
            .map(|p| resolve_relative(base_dir, p));

        let ds_sec = ini.section(Some("device_sync"));
        let ds_enabled = parse_bool01(
            ds_sec.and_then(|s| s.get("enabled")),
            "device_sync.enabled",
        )?;
        let ds_role = match ds_sec.and_then(|s| s.get("role")).unwrap_or("linked") {
            "primary" => DeviceSyncRole::Primary,
            "linked" => DeviceSyncRole::Linked,
            _ => return Err(Error::invalid_argument("device_sync.role")),
        };

        Ok(ClientConfig {
            client: ClientSection {
                server_ip,
                server_port,
                use_tls,
                require_tls,
                require_pinned_fingerprint,
                auth_mode,
                pinned_fingerprint,
            },
            kt: KtSection {
                require_signature: kt_require_signature,
                root_pubkey_path,
            },
            device_sync: DeviceSyncSection {
                enabled: ds_enabled,
                role: ds_role,
            },
        })
    }
}

fn resolve_relative(base_dir: &Path, p: &str) -> PathBuf {
    let candidate = Path::new(p);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

/// Storage root for one account: `$MI_E2EE_DATA_DIR` if set, else an
/// OS-appropriate default joined with `mi_e2ee/<username>`.
pub fn data_dir(username: &str) -> PathBuf {
    if let Ok(over) = std::env::var("MI_E2EE_DATA_DIR") {
        return PathBuf::from(over).join(username);
    }
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mi_e2ee")
        .join(username)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[client]
server_ip=127.0.0.1
server_port=9000
use_tls=0
require_tls=0
require_pinned_fingerprint=0
auth_mode=opaque

[kt]
require_signature=1
root_pubkey_path=kt_root.pub

[device_sync]
enabled=1
role=primary
";

    #[test]
    fn parses_sample_config() {
        let cfg = ClientConfig::parse(SAMPLE, Path::new("/etc/mi_e2ee")).unwrap();
        assert_eq!(cfg.client.server_ip, "127.0.0.1");
        assert_eq!(cfg.client.server_port, 9000);
        assert!(!cfg.client.use_tls);
        assert_eq!(cfg.client.auth_mode, AuthMode::Opaque);
        assert_eq!(
            cfg.kt.root_pubkey_path,
            Some(PathBuf::from("/etc/mi_e2ee/kt_root.pub"))
        );
        assert!(cfg.device_sync.enabled);
        assert_eq!(cfg.device_sync.role, DeviceSyncRole::Primary);
    }

    #[test]
    fn rejects_out_of_range_port() {
        let bad = SAMPLE.replace("server_port=9000", "server_port=0");
        assert!(ClientConfig::parse(&bad, Path::new(".")).is_err());
    }

    #[test]
    fn rejects_malformed_bool() {
        let bad = SAMPLE.replace("use_tls=0", "use_tls=yes");
        assert!(ClientConfig::parse(&bad, Path::new(".")).is_err());
    }
}
