//! Domain primitive types used across the Stratum workspace.

use std::fmt;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Unique identifier for a built image (the digest of its manifest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Creates a new image ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 characters, as shown in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 hash digest used for content verification and cache keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> crate::error::Result<Self> {
        let hex = hex.into();
        if hex.len() != crate::constants::SHA256_HEX_LENGTH
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(crate::error::StratumError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Creates a hash from raw digest bytes.
    #[must_use]
    pub fn from_digest(bytes: &[u8]) -> Self {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(hex, "{b:02x}");
        }
        Self(hex)
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 hex characters, as shown in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

impl TryFrom<String> for Sha256Hash {
    type Error = crate::error::StratumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value.strip_prefix("sha256:").map_or(value.clone(), str::to_owned);
        Self::from_hex(hex)
    }
}

impl From<Sha256Hash> for String {
    fn from(hash: Sha256Hash) -> Self {
        hash.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn from_hex_accepts_valid_digest() {
        let hash = Sha256Hash::from_hex(ZERO).expect("valid");
        assert_eq!(hash.as_hex(), ZERO);
        assert_eq!(hash.to_string(), format!("sha256:{ZERO}"));
    }

    #[test]
    fn from_hex_rejects_short_and_non_hex_input() {
        assert!(Sha256Hash::from_hex("abc").is_err());
        assert!(Sha256Hash::from_hex("z".repeat(64)).is_err());
    }

    #[test]
    fn from_hex_normalizes_case() {
        let hash = Sha256Hash::from_hex("AB".repeat(32)).expect("valid");
        assert_eq!(hash.as_hex(), "ab".repeat(32));
    }

    #[test]
    fn from_digest_encodes_lowercase_hex() {
        let hash = Sha256Hash::from_digest(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(hash.as_hex(), "deadbeef");
    }

    #[test]
    fn serde_uses_prefixed_form() {
        let hash = Sha256Hash::from_hex(ZERO).expect("valid");
        let json = serde_json::to_string(&hash).expect("serialize");
        assert_eq!(json, format!("\"sha256:{ZERO}\""));
        let back: Sha256Hash = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, hash);
    }

    #[test]
    fn image_id_short_truncates() {
        let id = ImageId::new("0123456789abcdef");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ImageId::new("abc").short(), "abc");
    }
}
