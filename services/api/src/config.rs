//! Server configuration

use anyhow::Result;
use std::env;

use crate::session::SESSION_TTL_SECONDS;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Lifetime of issued session tokens in seconds
    pub session_ttl_seconds: u64,
}

impl ServerConfig {
    /// Create a new ServerConfig from environment variables
    ///
    /// # Environment Variables
    /// - `HOST`: Bind address (default: "0.0.0.0")
    /// - `PORT`: Listen port (default: 5000)
    /// - `SESSION_TTL_SECONDS`: Session lifetime (default: 86400)
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = match env::var("PORT") {
            Ok(port) => port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid PORT {:?}: {}", port, e))?,
            Err(_) => 5000,
        };

        let session_ttl_seconds = env::var("SESSION_TTL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|ttl| *ttl > 0)
            .unwrap_or(SESSION_TTL_SECONDS);

        Ok(Self {
            host,
            port,
            session_ttl_seconds,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
