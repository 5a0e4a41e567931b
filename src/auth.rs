//!
//! Webhook keys, which callers present in the `Authorization` header.
//!
//! Only a salted SHA-256 of a key is ever stored, the salt is the identity of the configuration
//! the key belongs to.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of a generated key in hex characters
pub const KEY_LENGTH: usize = 24;

/// Generate a new random key
pub fn generate_key() -> String {
    let mut key = hex::encode(Uuid::new_v4().as_bytes());
    key.truncate(KEY_LENGTH);
    key
}

/// Salted hash of the key, hex encoded
pub fn hash_key(salt: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify the presented key against the stored hash
pub fn verify_key(salt: &str, key: &str, key_hash: &str) -> bool {
    hash_key(salt, key) == key_hash
}

/// Pull the credential out of an `Authorization` header, e.g. `Bearer <key>` or just `<key>`
pub fn credential(header: &str) -> &str {
    header.split_whitespace().last().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys() {
        let key = generate_key();
        assert_eq!(KEY_LENGTH, key.len());
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_verify() {
        let hash = hash_key("config-id", "key");
        assert!(verify_key("config-id", "key", &hash));
        assert!(!verify_key("config-id", "wrong", &hash));
        assert!(!verify_key("other-config", "key", &hash));
    }

    #[test]
    fn test_hash_is_salt_then_key() {
        assert_eq!(hash_key("ab", "c"), hash_key("a", "bc"));
        assert_eq!(64, hash_key("a", "b").len());
    }

    #[test]
    fn test_credential() {
        assert_eq!("abc", credential("Bearer abc"));
        assert_eq!("abc", credential("abc"));
        assert_eq!("", credential(""));
    }
}
