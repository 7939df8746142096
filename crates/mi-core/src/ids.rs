//! Composite identifier newtypes.
//!
//! The source concatenated strings like `"conv|mid"` as map keys; here each
//! identifier is its own type so the compiler enforces the right key shape
//! at every call site instead of relying on string formatting discipline.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rng().fill_bytes(&mut buf);
    buf
}

fn parse_hex<const N: usize>(s: &str) -> Result<[u8; N], hex::FromHexError> {
    let mut buf = [0u8; N];
    hex::decode_to_slice(s, &mut buf)?;
    Ok(buf)
}

macro_rules! hex_id {
    ($name:ident, $len:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn random() -> Self {
                Self(random_bytes::<$len>())
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(parse_hex::<$len>(s)?))
            }
        }
    };
}

hex_id!(DeviceId, 16, "16-byte random device identifier, hex-displayed.");
hex_id!(MessageId, 16, "16-byte random message identifier, hex-displayed.");
hex_id!(CallId, 16, "16-byte random group-call identifier, hex-displayed.");
hex_id!(Fingerprint, 32, "SHA-256 fingerprint of a raw public key.");

impl MessageId {
    /// A 32-character lowercase hex string, per the §8 testable property.
    pub fn is_well_formed_hex(s: &str) -> bool {
        s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_round_trips_through_hex() {
        let id = MessageId::random();
        let s = id.to_hex();
        assert!(MessageId::is_well_formed_hex(&s));
        let back: MessageId = s.parse().unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn device_id_is_16_bytes_32_hex_chars() {
        let id = DeviceId::random();
        assert_eq!(id.to_hex().len(), 32);
    }
}
