//! Wallet identity derivation

use sha2::{Digest, Sha256};

/// Minimum accepted wallet public key length.
pub const PUBKEY_MIN_LEN: usize = 32;

/// Maximum accepted wallet public key length.
pub const PUBKEY_MAX_LEN: usize = 64;

/// Derive the deterministic short instance id for a wallet public key.
///
/// The id is the first 12 hex digits of the SHA-256 of the key string, so
/// the same wallet always maps to the same instance.
pub fn derive_id(pubkey: &str) -> String {
    let digest = Sha256::digest(pubkey.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Trim and length-check a wallet public key from a request body.
pub fn validate_pubkey(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if (PUBKEY_MIN_LEN..=PUBKEY_MAX_LEN).contains(&trimmed.len()) {
        Some(trimmed)
    } else {
        None
    }
}

/// Docker container name for an instance.
pub fn container_name(id: &str) -> String {
    format!("openclaw-{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_deterministic() {
        let a = derive_id("wallet-public-key-0123456789abcdef");
        let b = derive_id("wallet-public-key-0123456789abcdef");
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_id_shape() {
        let id = derive_id(&"A".repeat(32));
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_derive_id_distinct_keys() {
        assert_ne!(derive_id(&"A".repeat(32)), derive_id(&"B".repeat(32)));
    }

    #[test]
    fn test_validate_pubkey_bounds() {
        assert!(validate_pubkey(&"A".repeat(31)).is_none());
        assert!(validate_pubkey(&"A".repeat(32)).is_some());
        assert!(validate_pubkey(&"A".repeat(64)).is_some());
        assert!(validate_pubkey(&"A".repeat(65)).is_none());
        assert!(validate_pubkey("").is_none());
    }

    #[test]
    fn test_validate_pubkey_trims() {
        let raw = format!("  {}\n", "C".repeat(40));
        assert_eq!(validate_pubkey(&raw), Some("C".repeat(40).as_str()));
    }

    #[test]
    fn test_container_name() {
        assert_eq!(container_name("0123456789ab"), "openclaw-0123456789ab");
    }
}
