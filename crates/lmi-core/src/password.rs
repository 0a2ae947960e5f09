//! Salted, peppered password hashing (PBKDF2-HMAC-SHA256).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

use crate::error::{LmiError, LmiResult};

const HASH_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Password hasher configured with a server pepper and an iteration count.
#[derive(Clone)]
pub struct PasswordHasher {
    pepper: String,
    iterations: NonZeroU32,
}

impl PasswordHasher {
    pub fn new(pepper: impl Into<String>, iterations: u32) -> Self {
        Self {
            pepper: pepper.into(),
            iterations: NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN),
        }
    }

    /// Generate a random base64 salt.
    pub fn generate_salt(&self) -> LmiResult<String> {
        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| LmiError::EntropyFailure("failed to generate salt".into()))?;
        Ok(STANDARD.encode(salt))
    }

    /// Hash `password` with `salt`; returns base64 of the derived key.
    pub fn hash(&self, password: &str, salt: &str) -> String {
        let mut out = [0u8; HASH_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt.as_bytes(),
            self.secret_input(password).as_bytes(),
            &mut out,
        );
        STANDARD.encode(out)
    }

    /// Constant-time comparison of `password` against a stored hash.
    pub fn verify(&self, password: &str, salt: &str, stored_hash: &str) -> bool {
        let Ok(expected) = STANDARD.decode(stored_hash) else {
            return false;
        };
        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt.as_bytes(),
            self.secret_input(password).as_bytes(),
            &expected,
        )
        .is_ok()
    }

    fn secret_input(&self, password: &str) -> String {
        let mut combined = String::with_capacity(password.len() + self.pepper.len());
        combined.push_str(password);
        combined.push_str(&self.pepper);
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hasher = PasswordHasher::new("pepper", 1000);
        let salt = hasher.generate_salt().unwrap();
        let hash = hasher.hash("correct horse", &salt);
        assert!(hasher.verify("correct horse", &salt, &hash));
        assert!(!hasher.verify("wrong horse", &salt, &hash));
    }

    #[test]
    fn pepper_is_part_of_the_hash() {
        let a = PasswordHasher::new("one", 1000);
        let b = PasswordHasher::new("two", 1000);
        let hash = a.hash("password1", "salt");
        assert!(!b.verify("password1", "salt", &hash));
    }

    #[test]
    fn salts_differ() {
        let hasher = PasswordHasher::new("", 1000);
        assert_ne!(hasher.generate_salt().unwrap(), hasher.generate_salt().unwrap());
    }

    #[test]
    fn corrupt_stored_hash_never_verifies() {
        let hasher = PasswordHasher::new("", 1000);
        assert!(!hasher.verify("password1", "salt", "not base64!"));
    }
}
