use std::sync::OnceLock;

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::warn;

use crate::error::ApiError;

/// One-way password digest used for storage and comparison.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, ApiError>;

    /// `false` for a mismatch and for a stored hash that cannot be parsed.
    fn verify(&self, password: &str, stored_hash: &str) -> bool;

    /// Spend what one `verify` costs when there is no stored hash, so an
    /// unknown username takes as long to reject as a wrong password.
    fn dummy_verify(&self, password: &str);
}

/// Argon2id with a fresh random salt per password. The PHC string stores
/// the salt and parameters, so changing params later keeps old hashes valid.
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    /// Hash with this hasher's params, made on first use.
    dummy: OnceLock<Option<String>>,
}

impl Argon2Hasher {
    pub fn new(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy: OnceLock::new(),
        }
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
            dummy: OnceLock::new(),
        }
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Unparsable stored password hash: {}", e);
                return false;
            }
        };

        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    fn dummy_verify(&self, password: &str) {
        let dummy = self
            .dummy
            .get_or_init(|| self.hash("parley-dummy-credential").ok());
        if let Some(hash) = dummy {
            self.verify(password, hash);
        }
    }
}
