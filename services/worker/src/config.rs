//! Worker configuration

use anyhow::{Result, anyhow};
use std::{env, time::Duration};

/// Widths rendered when `THUMBNAIL_WIDTHS` is unset
pub const DEFAULT_WIDTHS: [u32; 3] = [500, 250, 100];

/// Thumbnail worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent consumers
    pub concurrency: usize,
    /// Attempts a job gets before it is dead-lettered
    pub max_attempts: u32,
    /// Pause between polls of an empty queue
    pub poll_interval: Duration,
    /// Claims held longer than this are handed to another consumer
    pub visibility_timeout: Duration,
    pub widths: Vec<u32>,
    /// Requeue jobs left in the processing list by a previous run
    pub recover_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 3,
            poll_interval: Duration::from_millis(500),
            visibility_timeout: Duration::from_secs(300),
            widths: DEFAULT_WIDTHS.to_vec(),
            recover_on_start: false,
        }
    }
}

impl WorkerConfig {
    /// Create a new WorkerConfig from environment variables
    ///
    /// # Environment Variables
    /// - `WORKER_CONCURRENCY`: Number of consumers (default: 2)
    /// - `THUMBNAIL_MAX_ATTEMPTS`: Attempts per job (default: 3)
    /// - `WORKER_POLL_INTERVAL_MS`: Empty queue back-off (default: 500)
    /// - `WORKER_VISIBILITY_TIMEOUT_SECS`: Claim lifetime before requeue (default: 300)
    /// - `THUMBNAIL_WIDTHS`: Comma separated widths (default: "500,250,100")
    /// - `WORKER_RECOVER_ON_START`: Requeue in-flight jobs at start-up (default: false)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let concurrency = env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.concurrency);

        let max_attempts = env::var("THUMBNAIL_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_attempts);

        let poll_interval = env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let visibility_timeout = env::var("WORKER_VISIBILITY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.visibility_timeout);

        let widths = match env::var("THUMBNAIL_WIDTHS") {
            Ok(value) => parse_widths(&value)?,
            Err(_) => defaults.widths,
        };

        let recover_on_start = env::var("WORKER_RECOVER_ON_START")
            .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.recover_on_start);

        Ok(Self {
            concurrency,
            max_attempts,
            poll_interval,
            visibility_timeout,
            widths,
            recover_on_start,
        })
    }
}

fn parse_widths(value: &str) -> Result<Vec<u32>> {
    let widths = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u32>() {
            Ok(width) if width > 0 => Ok(width),
            _ => Err(anyhow!("Invalid thumbnail width {:?}", s)),
        })
        .collect::<Result<Vec<_>>>()?;

    if widths.is_empty() {
        return Err(anyhow!("THUMBNAIL_WIDTHS must name at least one width"));
    }

    Ok(widths)
}
