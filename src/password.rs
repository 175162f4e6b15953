//! Argon2id password hashing, run off the async executor.

use std::sync::{Arc, OnceLock};

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

/// Memory cost in KiB (64 MiB).
const M_COST: u32 = 64 * 1024;
/// Passes over memory.
const T_COST: u32 = 3;
const P_COST: u32 = 1;

/// Hashes and verifies passwords. Cheap to clone.
#[derive(Clone, Default)]
pub struct PasswordHasher {
    /// Hash compared against when the account does not exist, so an unknown
    /// email costs the same as a wrong password.
    dummy: Arc<OnceLock<String>>,
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a plaintext password with a random salt.
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hash_blocking(&password))
            .await
            .map_err(|_| PasswordError::TaskFailed)?
    }

    /// Verify a plaintext password against a stored hash.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || verify_blocking(&password, &hash))
            .await
            .map_err(|_| PasswordError::TaskFailed)?
    }

    /// Burn one verification against a fixed hash. Always returns false.
    pub async fn verify_dummy(&self, password: &str) -> Result<bool, PasswordError> {
        let password = password.to_owned();
        let dummy = self.dummy.clone();
        tokio::task::spawn_blocking(move || {
            let hash = match dummy.get() {
                Some(hash) => hash.clone(),
                None => {
                    let hash = hash_blocking("nutricrm-dummy-password")?;
                    dummy.get_or_init(|| hash).clone()
                }
            };
            verify_blocking(&password, &hash).map(|_| false)
        })
        .await
        .map_err(|_| PasswordError::TaskFailed)?
    }
}

fn argon2() -> Result<Argon2<'static>, PasswordError> {
    let params = Params::new(M_COST, T_COST, P_COST, None).map_err(PasswordError::Params)?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn hash_blocking(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(PasswordError::Hash)
}

fn verify_blocking(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(PasswordError::Hash)?;
    // Cost parameters are read from the stored hash.
    match argon2()?.verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Hash(e)),
    }
}

#[derive(Debug)]
pub enum PasswordError {
    Hash(argon2::password_hash::Error),
    Params(argon2::Error),
    /// The blocking task panicked or was cancelled
    TaskFailed,
}

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordError::Hash(e) => write!(f, "Password hashing failed: {}", e),
            PasswordError::Params(e) => write!(f, "Invalid Argon2 parameters: {}", e),
            PasswordError::TaskFailed => write!(f, "Password hashing task failed"),
        }
    }
}

impl std::error::Error for PasswordError {}
