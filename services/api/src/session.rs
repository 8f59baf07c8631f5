//! Session management using the key-value store
//!
//! A session is a single `auth_<token> -> user id` entry. Its lifetime is the
//! store TTL set at issue time; there is no refresh, so an expired token
//! forces the user to authenticate again.

use anyhow::Result;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use std::sync::Arc;
use tracing::{info, warn};

use common::cache::KeyValueStore;

/// Default session lifetime: 24 hours
pub const SESSION_TTL_SECONDS: u64 = 24 * 60 * 60;

/// 43 alphanumeric characters carry about 256 bits of entropy
const TOKEN_LENGTH: usize = 43;

/// Session manager for issuing, resolving and revoking bearer tokens
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    ttl_seconds: u64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Create a new session for a user and return its token
    pub async fn issue(&self, user_id: i64) -> Result<String> {
        let token = generate_token();

        self.store
            .set(
                &session_key(&token),
                &user_id.to_string(),
                Some(self.ttl_seconds),
            )
            .await?;

        info!(user_id, ttl_seconds = self.ttl_seconds, "Session issued");
        Ok(token)
    }

    /// Resolve a token to the user it was issued for
    ///
    /// Missing and expired tokens are indistinguishable.
    pub async fn resolve(&self, token: &str) -> Result<Option<i64>> {
        let Some(value) = self.store.get(&session_key(token)).await? else {
            return Ok(None);
        };

        match value.parse() {
            Ok(user_id) => Ok(Some(user_id)),
            Err(_) => {
                warn!("Session entry holds a malformed user id");
                Ok(None)
            }
        }
    }

    /// Delete a session; revoking an unknown token is not an error
    pub async fn revoke(&self, token: &str) -> Result<()> {
        self.store.delete(&session_key(token)).await?;
        Ok(())
    }
}

fn session_key(token: &str) -> String {
    format!("auth_{}", token)
}

fn generate_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
