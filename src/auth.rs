//! Password hashing and SSH key fingerprinting (spec §3 User/SSHKey).

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::error::{ServerError, ServerResult};

/// Hash a password using Argon2id. SSH-only accounts store an empty hash and
/// must never reach this function with an empty password.
pub fn hash_password(password: &str) -> ServerResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ServerError::Validation(format!("failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash. SSH-only accounts (empty hash)
/// never authenticate via password — this always returns `false` for them.
pub fn verify_password(password: &str, hash: &str) -> bool {
    if hash.is_empty() {
        return false;
    }
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Compute the `"SHA256:base64"` fingerprint of an SSH public key, matching
/// the format OpenSSH itself prints for `ssh-keygen -lf`.
pub fn ssh_fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    format!("SHA256:{}", STANDARD.encode(digest).trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn ssh_only_account_never_verifies_by_password() {
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn fingerprint_is_stable_for_same_key() {
        let key = b"ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAI...";
        assert_eq!(ssh_fingerprint(key), ssh_fingerprint(key));
        assert!(ssh_fingerprint(key).starts_with("SHA256:"));
    }
}
