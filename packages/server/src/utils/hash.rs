//! One-way password hashing (Argon2id).

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use thiserror::Error;

use crate::config::Argon2Config;

#[derive(Debug, Error)]
pub enum PasswordError {
    /// The plaintext could not be hashed (e.g. exceeds the algorithm's input limits).
    #[error("password encoding failed: {0}")]
    Encoding(String),
    /// The configured cost parameters are out of range.
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
}

/// Salted Argon2id hasher with tunable cost.
///
/// Stored credentials are PHC strings, so verification always uses the
/// parameters embedded in the stored hash, not the current configuration.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    params: Argon2Config,
}

impl PasswordHasher {
    pub fn new(params: Argon2Config) -> Result<Self, PasswordError> {
        // Validate eagerly so a bad config fails at startup, not at first login.
        Self { params }.argon2()?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            None,
        )
        .map_err(|e| PasswordError::Params(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| PasswordError::Encoding(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Check `plaintext` against a stored credential.
    ///
    /// Never fails: a malformed stored credential is logged and treated as a mismatch.
    pub fn verify(&self, plaintext: &str, credential: &str) -> bool {
        let parsed = match PasswordHash::new(credential) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Stored password credential is malformed: {}", e);
                return false;
            }
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}
