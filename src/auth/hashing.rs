//! Keyed password hashing
//!
//! `HMAC-SHA256(server_key, data)`, URL-safe base64 with padding. Shared by
//! both services so stored hashes stay comparable.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct DataHasher {
    mac: HmacSha256,
}

impl DataHasher {
    pub fn new(key: &str) -> Result<Self, AuthError> {
        if key.is_empty() {
            return Err(AuthError::MissingRequiredData("auth.hash_key".into()));
        }
        let mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| AuthError::InvalidRequest(format!("hash key: {e}")))?;
        Ok(Self { mac })
    }

    pub fn hash(&self, data: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(data.as_bytes());
        URL_SAFE.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of `data` against a stored hash
    pub fn matches(&self, data: &str, stored: &str) -> bool {
        let Ok(expected) = URL_SAFE.decode(stored) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(data.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for DataHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataHasher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_digest_shape() {
        let hasher = DataHasher::new("server-key").unwrap();
        let digest = hasher.hash("secret");
        // 32 bytes -> 44 base64 chars with one pad
        assert_eq!(digest.len(), 44);
        assert!(digest.ends_with('='));
        assert!(!digest.contains('+') && !digest.contains('/'));
        assert!(hasher.matches("secret", &digest));
        assert!(!hasher.matches("Secret", &digest));
        assert!(!hasher.matches("secret", "not base64!"));
    }

    #[test]
    fn test_key_changes_digest() {
        let a = DataHasher::new("key-a").unwrap();
        let b = DataHasher::new("key-b").unwrap();
        assert_ne!(a.hash("same"), b.hash("same"));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            DataHasher::new(""),
            Err(AuthError::MissingRequiredData(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic(data in ".*") {
            let hasher = DataHasher::new("k").unwrap();
            prop_assert_eq!(hasher.hash(&data), hasher.hash(&data));
        }

        #[test]
        fn prop_distinct_inputs_distinct_hashes(x in ".{0,64}", y in ".{0,64}") {
            prop_assume!(x != y);
            let hasher = DataHasher::new("k").unwrap();
            prop_assert_ne!(hasher.hash(&x), hasher.hash(&y));
        }
    }
}
