//! API key hashing
//!
//! Keys are stored as Argon2id PHC strings and never kept in plaintext.

use anyhow::Result;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};

use crate::config::HashConfig;

/// Prefix of generated keys, making them recognizable in logs and configs
pub const KEY_PREFIX: &str = "agk_";

/// Argon2id hasher with configurable cost
#[derive(Debug, Clone)]
pub struct KeyHasher {
    params: Params,
}

impl KeyHasher {
    pub fn new(config: &HashConfig) -> Result<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a key using Argon2id with a fresh random salt
    pub fn hash(&self, key: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(key.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash API key: {}", e))?
            .to_string();
        Ok(hash)
    }

    /// Verify a key against a stored hash.
    ///
    /// The cost parameters are read from the hash itself, so records hashed
    /// under older settings still verify. A malformed hash never matches.
    pub fn verify(&self, key: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2()
                .verify_password(key.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored API key hash is malformed");
                false
            }
        }
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

/// Generate a new random API key
pub fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
pub(crate) fn fast_hasher() -> KeyHasher {
    KeyHasher::new(&HashConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}
