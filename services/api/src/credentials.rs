//! Credential verification and password hashing

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{Rng, distributions::Alphanumeric};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::debug;

use common::{error::DatabaseError, repositories::UserStore};

/// Failure to authenticate a user
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Unknown email, wrong password or unreadable stored hash
    #[error("Invalid credentials")]
    Invalid,

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Hash a password for storage
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(hash.to_string())
}

/// Stand-in hash verified against when the email is unknown
static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

fn dummy_hash() -> Option<&'static str> {
    DUMMY_HASH
        .get_or_init(|| {
            let password: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(32)
                .map(char::from)
                .collect();
            hash_password(&password).ok()
        })
        .as_deref()
}

/// Run one argon2 verify of `password`, against the dummy hash when `stored` is `None`
///
/// A missing record never matches, but costs the same as a wrong password.
fn password_matches(stored: Option<&str>, password: &str) -> bool {
    let Some(hash) = stored.or_else(|| dummy_hash()) else {
        return false;
    };

    let matched = match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            debug!("Stored password hash is unreadable: {}", e);
            false
        }
    };

    matched && stored.is_some()
}

/// Checks email and password pairs against stored user records
#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserStore>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Return the id of the user owning `email` when `password` matches
    ///
    /// Every mismatch yields [`CredentialError::Invalid`] without saying why.
    pub async fn verify(&self, email: &str, password: &str) -> Result<i64, CredentialError> {
        let user = self.users.find_by_email(email).await?;
        let stored = user.as_ref().map(|u| u.password_hash.as_str());

        match user {
            Some(user) if password_matches(stored, password) => Ok(user.id),
            _ => Err(CredentialError::Invalid),
        }
    }
}
