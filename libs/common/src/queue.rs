//! Durable thumbnail job queue backed by Redis lists
//!
//! A job lives in exactly one of three lists. `queued` holds pending jobs,
//! `processing` holds jobs claimed by a consumer and `dead` holds jobs that
//! will never be retried. Claiming atomically moves an entry from `queued` to
//! `processing`, so two consumers can never hold the same entry.
//!
//! Every claim is also stamped in the `claimed` sorted set. A claim that is
//! not settled within the visibility timeout is moved back to `queued` by
//! [`JobQueue::requeue_stale`], so a consumer that dies mid-job never strands
//! its entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{
    cache::RedisPool,
    error::{QueueError, QueueResult},
};

/// Request to render thumbnails for an uploaded image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailJob {
    pub file_id: i64,
    pub user_id: i64,
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far
    pub attempts: u32,
}

impl ThumbnailJob {
    pub fn new(file_id: i64, user_id: i64) -> Self {
        Self {
            file_id,
            user_id,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// A job held exclusively by one consumer
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: ThumbnailJob,
    /// Raw queue entry, used to remove the claim on ack/retry/dead-letter
    pub receipt: String,
}

/// Terminal record for a job that will not be retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// `None` when the queue entry itself could not be decoded
    pub job: Option<ThumbnailJob>,
    pub raw: Option<String>,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Work queue contract consumed by the ingestion path and the worker pool
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the pending list
    async fn enqueue(&self, job: &ThumbnailJob) -> QueueResult<()>;

    /// Claim the oldest pending job, `None` when the queue is empty
    async fn claim(&self) -> QueueResult<Option<ClaimedJob>>;

    /// Acknowledge a successfully processed job
    async fn ack(&self, claimed: &ClaimedJob) -> QueueResult<()>;

    /// Release the claim and queue the job again with one more attempt
    async fn retry(&self, claimed: &ClaimedJob) -> QueueResult<()>;

    /// Release the claim and park the job in the dead-letter list
    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> QueueResult<()>;

    /// Move claims older than `visibility_timeout` back to pending
    ///
    /// Safe to call from any number of consumers and processes.
    async fn requeue_stale(&self, visibility_timeout: Duration) -> QueueResult<usize>;

    /// Move every claimed job back to pending, returning how many moved
    ///
    /// Only safe when no other consumer process is running.
    async fn recover_in_flight(&self) -> QueueResult<usize>;

    /// Newest dead letters first
    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>>;
}

/// Redis key names used by the queue
#[derive(Debug, Clone)]
pub struct QueueKeys {
    pub queued: String,
    pub processing: String,
    /// Sorted set of claim times in epoch milliseconds
    pub claimed: String,
    pub dead: String,
}

impl QueueKeys {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            queued: format!("{}:queued", prefix),
            processing: format!("{}:processing", prefix),
            claimed: format!("{}:claimed", prefix),
            dead: format!("{}:dead", prefix),
        }
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self::with_prefix("thumbnail")
    }
}

/// KEYS: queued, processing, claimed. ARGV: claim time.
const CLAIM_SCRIPT: &str = r#"
local raw = redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
if raw then
    redis.call('ZADD', KEYS[3], ARGV[1], raw)
end
return raw
"#;

/// KEYS: processing, claimed, target list. ARGV: receipt, entry to push.
///
/// The entry is pushed only when the claim was still held, so a settle that
/// races a stale requeue cannot duplicate the job.
const SETTLE_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[2], ARGV[1])
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 and ARGV[2] ~= '' then
    redis.call('LPUSH', KEYS[3], ARGV[2])
end
return removed
"#;

/// KEYS: queued, processing, claimed. ARGV: cutoff time.
const REQUEUE_STALE_SCRIPT: &str = r#"
local stale = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
local moved = 0
for _, raw in ipairs(stale) do
    redis.call('ZREM', KEYS[3], raw)
    if redis.call('LREM', KEYS[2], 1, raw) > 0 then
        redis.call('RPUSH', KEYS[1], raw)
        moved = moved + 1
    end
end
return moved
"#;

/// Redis implementation of [`JobQueue`]
#[derive(Clone)]
pub struct RedisJobQueue {
    pool: RedisPool,
    keys: QueueKeys,
}

impl RedisJobQueue {
    pub fn new(pool: RedisPool) -> Self {
        Self::with_keys(pool, QueueKeys::default())
    }

    pub fn with_keys(pool: RedisPool, keys: QueueKeys) -> Self {
        Self { pool, keys }
    }

    async fn bury_raw(&self, raw: &str, reason: String) -> QueueResult<()> {
        let letter = DeadLetter {
            job: None,
            raw: Some(raw.to_string()),
            error: reason,
            failed_at: Utc::now(),
        };
        let payload = serde_json::to_string(&letter)?;
        self.settle(raw, &self.keys.dead, &payload).await?;
        Ok(())
    }

    /// Drop the claim on `receipt`, pushing `entry` onto `target` when the
    /// claim was still held. Returns whether it was.
    async fn settle(&self, receipt: &str, target: &str, entry: &str) -> QueueResult<bool> {
        let mut conn = self.pool.connection();
        let removed: i64 = Script::new(SETTLE_SCRIPT)
            .key(&self.keys.processing)
            .key(&self.keys.claimed)
            .key(target)
            .arg(receipt)
            .arg(entry)
            .invoke_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &ThumbnailJob) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.pool.connection();
        let _: i64 = conn.lpush(&self.keys.queued, payload).await?;
        Ok(())
    }

    async fn claim(&self) -> QueueResult<Option<ClaimedJob>> {
        loop {
            let mut conn = self.pool.connection();
            let raw: Option<String> = Script::new(CLAIM_SCRIPT)
                .key(&self.keys.queued)
                .key(&self.keys.processing)
                .key(&self.keys.claimed)
                .arg(Utc::now().timestamp_millis())
                .invoke_async(&mut conn)
                .await?;

            let Some(raw) = raw else {
                return Ok(None);
            };

            match serde_json::from_str::<ThumbnailJob>(&raw) {
                Ok(job) => return Ok(Some(ClaimedJob { job, receipt: raw })),
                Err(e) => {
                    error!("Dead-lettering undecodable queue entry: {}", e);
                    self.bury_raw(&raw, format!("undecodable job: {}", e))
                        .await?;
                }
            }
        }
    }

    async fn ack(&self, claimed: &ClaimedJob) -> QueueResult<()> {
        if !self.settle(&claimed.receipt, &self.keys.queued, "").await? {
            warn!(
                file_id = claimed.job.file_id,
                "Acknowledged job was no longer claimed"
            );
        }

        Ok(())
    }

    async fn retry(&self, claimed: &ClaimedJob) -> QueueResult<()> {
        let mut next = claimed.job.clone();
        next.attempts += 1;
        let payload = serde_json::to_string(&next)?;

        if !self
            .settle(&claimed.receipt, &self.keys.queued, &payload)
            .await?
        {
            warn!(
                file_id = claimed.job.file_id,
                "Retried job was no longer claimed"
            );
        }

        Ok(())
    }

    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> QueueResult<()> {
        let letter = DeadLetter {
            job: Some(claimed.job.clone()),
            raw: None,
            error: reason.to_string(),
            failed_at: Utc::now(),
        };
        let payload = serde_json::to_string(&letter)?;

        if !self
            .settle(&claimed.receipt, &self.keys.dead, &payload)
            .await?
        {
            warn!(
                file_id = claimed.job.file_id,
                "Dead-lettered job was no longer claimed"
            );
        }

        Ok(())
    }

    async fn requeue_stale(&self, visibility_timeout: Duration) -> QueueResult<usize> {
        let timeout_ms = i64::try_from(visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(timeout_ms);

        let mut conn = self.pool.connection();
        let moved: usize = Script::new(REQUEUE_STALE_SCRIPT)
            .key(&self.keys.queued)
            .key(&self.keys.processing)
            .key(&self.keys.claimed)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;

        if moved > 0 {
            warn!("Requeued {} thumbnail jobs whose claim timed out", moved);
        }

        Ok(moved)
    }

    async fn recover_in_flight(&self) -> QueueResult<usize> {
        let mut conn = self.pool.connection();
        let mut moved = 0;

        loop {
            let raw: Option<String> = redis::cmd("LMOVE")
                .arg(&self.keys.processing)
                .arg(&self.keys.queued)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;

            if raw.is_none() {
                break;
            }
            moved += 1;
        }

        let _: i64 = conn.del(&self.keys.claimed).await?;

        if moved > 0 {
            info!("Recovered {} in-flight thumbnail jobs", moved);
        }

        Ok(moved)
    }

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.connection();
        let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
        let entries: Vec<String> = conn.lrange(&self.keys.dead, 0, stop).await?;

        entries
            .iter()
            .map(|entry| serde_json::from_str(entry).map_err(QueueError::from))
            .collect()
    }
}
