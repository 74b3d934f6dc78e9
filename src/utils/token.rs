use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand_core::{OsRng, RngCore};

use crate::error_handling::types::DatastoreError;

/// Returns `size` bytes from the OS RNG encoded as URL-safe base64.
///
/// Used for host node keys and session keys.
pub fn random_text(size: usize) -> String {
    let mut buf = vec![0u8; size];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Hashes a plaintext password into a PHC string with a fresh salt.
pub fn hash_password(plaintext: &str) -> Result<String, DatastoreError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| DatastoreError::Password(e.to_string()))?;
    Ok(hash.to_string())
}

pub fn verify_password(plaintext: &str, hash: &str) -> Result<bool, DatastoreError> {
    let parsed = PasswordHash::new(hash).map_err(|e| DatastoreError::Password(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_text_length_and_uniqueness() {
        let a = random_text(24);
        let b = random_text(24);
        assert_ne!(a, b);
        // 24 bytes encode to exactly 32 base64 characters
        assert_eq!(a.len(), 32);
        assert!(!a.contains('='));
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("p4ssw0rd").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("p4ssw0rd", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(verify_password("x", "not-a-phc-string").is_err());
    }
}
