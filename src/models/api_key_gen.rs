use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Prefix for newly issued keys
pub const DEFAULT_API_KEY_PREFIX: &str = "tg_live_";

/// A freshly minted credential.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Full key, shown to the owner once.
    pub raw: String,
    /// Hex SHA-256 of `raw`, the only form that is stored.
    pub hash: String,
}

/// Mint a key as `prefix` followed by 32 random bytes in URL-safe base64.
pub fn generate_api_key_with_prefix(prefix: &str) -> GeneratedKey {
    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill(&mut random_bytes);

    let raw = format!(
        "{}{}",
        prefix,
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
    );
    let hash = hash_api_key(&raw);
    GeneratedKey { raw, hash }
}

pub fn generate_api_key() -> GeneratedKey {
    generate_api_key_with_prefix(DEFAULT_API_KEY_PREFIX)
}

/// Hex-encoded SHA-256 of a raw key.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Constant-time check of a raw key against a stored hash.
pub fn verify_api_key(raw_key: &str, stored_hash: &str) -> bool {
    hash_api_key(raw_key)
        .as_bytes()
        .ct_eq(stored_hash.as_bytes())
        .into()
}

/// Constant-time prefix check. Keys shorter than the prefix never match.
pub fn has_valid_prefix(key: &str, expected_prefix: &str) -> bool {
    match key.as_bytes().get(..expected_prefix.len()) {
        Some(head) => head.ct_eq(expected_prefix.as_bytes()).into(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("tg_live_abcd123", "tg_live_", true)]
    #[case("tg_test_xyz789", "tg_test_", true)]
    #[case("tg_live_", "tg_live_", true)]
    #[case("tg_live", "tg_live_", false)]
    #[case("", "tg_live_", false)]
    #[case("tg_test_abc", "tg_live_", false)]
    #[case("tg_", "tg_live_", false)]
    fn test_has_valid_prefix(#[case] key: &str, #[case] prefix: &str, #[case] expected: bool) {
        assert_eq!(has_valid_prefix(key, prefix), expected);
    }

    #[test]
    fn test_prefix_check_on_multibyte_input() {
        assert!(!has_valid_prefix("té", "tg_live_"));
        assert!(!has_valid_prefix("ééééééééé", "tg_live_"));
    }

    #[test]
    fn test_generated_key_shape() {
        let key = generate_api_key();
        assert!(key.raw.starts_with(DEFAULT_API_KEY_PREFIX));
        // 32 bytes in unpadded base64 is 43 characters
        assert_eq!(key.raw.len(), DEFAULT_API_KEY_PREFIX.len() + 43);
        assert_eq!(key.hash, hash_api_key(&key.raw));
        assert_eq!(key.hash.len(), 64);
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = generate_api_key_with_prefix("acme_");
        let b = generate_api_key_with_prefix("acme_");
        assert_ne!(a.raw, b.raw);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_verify_api_key() {
        let key = generate_api_key();
        assert!(verify_api_key(&key.raw, &key.hash));
        assert!(!verify_api_key("tg_live_wrong", &key.hash));
    }
}
