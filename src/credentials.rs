//! Deterministic credential derivation. Pure, synchronous, no I/O — every
//! function here takes its inputs and returns a `String`, which is what
//! makes its determinism properties straightforwardly testable.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use md5::Md5;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Fixed length of a derived master password. RDS requires at least 8
/// characters for every supported engine; 32 leaves ample entropy margin
/// once non-alphanumeric characters are stripped from the digest.
const MASTER_PASSWORD_LEN: usize = 32;

/// `H(seed ‖ instanceId)`, SHA-256 base64url-encoded, truncated to
/// `MASTER_PASSWORD_LEN` alphanumeric characters.
#[must_use]
pub fn derive_master_password(seed: &str, instance_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(instance_id.as_bytes());
    let digest = hasher.finalize();
    alphanumeric_from_digest(&digest, MASTER_PASSWORD_LEN)
}

/// `H_new(bindingId)`, SHA-256 base64url-encoded, truncated to the
/// engine's maximum identifier length.
#[must_use]
pub fn derive_binding_username(binding_id: &str, max_len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(binding_id.as_bytes());
    let digest = hasher.finalize();
    // Usernames must start with a letter on every supported engine.
    prefixed_alphanumeric_from_digest('u', &digest, max_len)
}

/// `H_old(bindingId)`, MD5-based legacy fallback. Never used to create new
/// bindings — only to look up and drop users created by an older broker
/// version before falling back to `NotFound`.
#[must_use]
pub fn derive_binding_username_legacy(binding_id: &str, max_len: usize) -> String {
    let mut hasher = Md5::new();
    hasher.update(binding_id.as_bytes());
    let digest = hasher.finalize();
    prefixed_alphanumeric_from_digest('u', &digest, max_len)
}

/// A random alphanumeric string of length `n`, used for binding passwords
/// and the one-time master username generated at instance creation.
#[must_use]
pub fn random_alphanumeric(n: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

fn alphanumeric_from_digest(digest: &[u8], max_len: usize) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(digest);
    let stripped: String = encoded.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    stripped.chars().take(max_len).collect()
}

fn prefixed_alphanumeric_from_digest(prefix: char, digest: &[u8], max_len: usize) -> String {
    let body_len = max_len.saturating_sub(1);
    let body = alphanumeric_from_digest(digest, body_len);
    format!("{prefix}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_password_is_deterministic_and_fixed_length() {
        let a = derive_master_password("seed-1", "instance-1");
        let b = derive_master_password("seed-1", "instance-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), MASTER_PASSWORD_LEN);
    }

    #[test]
    fn master_password_changes_with_either_input() {
        let base = derive_master_password("seed-1", "instance-1");
        assert_ne!(base, derive_master_password("seed-2", "instance-1"));
        assert_ne!(base, derive_master_password("seed-1", "instance-2"));
    }

    #[test]
    fn binding_username_is_deterministic() {
        let a = derive_binding_username("binding-1", 63);
        let b = derive_binding_username("binding-1", 63);
        assert_eq!(a, b);
        assert!(a.len() <= 63);
        assert!(a.chars().next().unwrap().is_ascii_alphabetic());
    }

    #[test]
    fn binding_username_respects_max_len() {
        let short = derive_binding_username("a-very-long-binding-identifier-indeed", 32);
        assert!(short.len() <= 32);
    }

    #[test]
    fn legacy_and_new_derivations_differ_on_almost_all_inputs() {
        let ids = ["a", "b", "binding-123", "another-binding", "xyz-789"];
        let mismatches = ids
            .iter()
            .filter(|id| {
                derive_binding_username(id, 63) != derive_binding_username_legacy(id, 63)
            })
            .count();
        assert_eq!(mismatches, ids.len());
    }

    #[test]
    fn random_alphanumeric_has_requested_length_and_charset() {
        let s = random_alphanumeric(24);
        assert_eq!(s.len(), 24);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
