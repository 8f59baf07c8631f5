//! In-memory implementations of the store contracts
//!
//! Used as fakes in tests of the API server and the worker. The key-value
//! store honours TTLs against a clock that tests can move forward.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{
    cache::KeyValueStore,
    error::{DatabaseError, DatabaseResult, QueueError, QueueResult},
    models::{File, NewFile, User},
    queue::{ClaimedJob, DeadLetter, JobQueue, ThumbnailJob},
    repositories::{FILES_PER_PAGE, FileStore, UserStore},
};

/// Key-value store with TTL support
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    offset: Mutex<Duration>,
    unreachable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Move the store clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }

    /// Remaining TTL of a live key
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.now();
        let entries = self.entries.lock().unwrap();
        let (_, expires_at) = entries.get(key)?;
        expires_at.map(|at| at.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        let now = self.now();
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|(_, expires_at)| expires_at.is_none_or(|at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn now(&self) -> Instant {
        Instant::now() + *self.offset.lock().unwrap()
    }

    fn check(&self) -> Result<()> {
        if self.unreachable {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let now = self.now();
        let mut entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= now => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        self.check()?;
        let expires_at = ttl_seconds.map(|ttl| self.now() + Duration::from_secs(ttl));
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        self.check()?;
        Ok(true)
    }
}

/// Users collection
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, email: &str, password_hash: &str) -> DatabaseResult<User> {
        let mut users = self.users.lock().unwrap();

        if users.iter().any(|user| user.email == email) {
            return Err(DatabaseError::Duplicate(email.to_string()));
        }

        let user = User {
            id: users.len() as i64 + 1,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|user| user.email == email).cloned())
    }

    async fn count(&self) -> DatabaseResult<i64> {
        Ok(self.users.lock().unwrap().len() as i64)
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        Ok(true)
    }
}

/// Files collection
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<Vec<File>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record
    pub fn all(&self) -> Vec<File> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn insert(&self, file: NewFile) -> DatabaseResult<File> {
        let mut files = self.files.lock().unwrap();
        let stored = File {
            id: files.len() as i64 + 1,
            user_id: file.user_id,
            name: file.name,
            file_type: file.file_type,
            is_public: file.is_public,
            parent_id: file.parent_id,
            local_path: file.local_path,
        };
        files.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<File>> {
        let files = self.files.lock().unwrap();
        Ok(files.iter().find(|file| file.id == id).cloned())
    }

    async fn find_owned(&self, id: i64, user_id: i64) -> DatabaseResult<Option<File>> {
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .find(|file| file.id == id && file.user_id == user_id)
            .cloned())
    }

    async fn list(&self, user_id: i64, parent_id: i64, page: u32) -> DatabaseResult<Vec<File>> {
        let per_page = FILES_PER_PAGE as usize;
        let files = self.files.lock().unwrap();

        Ok(files
            .iter()
            .filter(|file| file.user_id == user_id && file.parent_id == parent_id)
            .skip(page as usize * per_page)
            .take(per_page)
            .cloned()
            .collect())
    }

    async fn set_public(
        &self,
        id: i64,
        user_id: i64,
        is_public: bool,
    ) -> DatabaseResult<Option<File>> {
        let mut files = self.files.lock().unwrap();

        Ok(files
            .iter_mut()
            .find(|file| file.id == id && file.user_id == user_id)
            .map(|file| {
                file.is_public = is_public;
                file.clone()
            }))
    }

    async fn count(&self) -> DatabaseResult<i64> {
        Ok(self.files.lock().unwrap().len() as i64)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queued: VecDeque<String>,
    /// Claimed entries with their claim time
    processing: Vec<(String, Instant)>,
    dead: Vec<DeadLetter>,
}

/// Job queue with the same list semantics as the Redis queue
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    offset: Mutex<Duration>,
    rejects_enqueue: bool,
    failing_settles: AtomicUsize,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that refuses every enqueue
    pub fn rejecting() -> Self {
        Self {
            rejects_enqueue: true,
            ..Self::default()
        }
    }

    /// Make the next `count` ack, retry or dead-letter calls fail
    pub fn fail_next_settles(&self, count: usize) {
        self.failing_settles.store(count, Ordering::SeqCst);
    }

    /// Move the queue clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }

    /// Pending jobs, oldest first
    pub fn queued(&self) -> Vec<ThumbnailJob> {
        let state = self.state.lock().unwrap();
        state
            .queued
            .iter()
            .rev()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().processing.len()
    }

    /// Dead letters, oldest first
    pub fn dead(&self) -> Vec<DeadLetter> {
        self.state.lock().unwrap().dead.clone()
    }

    /// Push a raw entry, bypassing serialization
    pub fn push_raw(&self, raw: &str) {
        self.state
            .lock()
            .unwrap()
            .queued
            .push_front(raw.to_string());
    }

    fn now(&self) -> Instant {
        Instant::now() + *self.offset.lock().unwrap()
    }

    fn check_settle(&self) -> QueueResult<()> {
        let failed = self
            .failing_settles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failed {
            return Err(QueueError::Unavailable("settle rejected".to_string()));
        }
        Ok(())
    }

    /// Drop the claim on `receipt`, returning whether it was still held
    fn release(state: &mut QueueState, receipt: &str) -> bool {
        match state.processing.iter().position(|(entry, _)| entry == receipt) {
            Some(index) => {
                state.processing.remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &ThumbnailJob) -> QueueResult<()> {
        if self.rejects_enqueue {
            return Err(QueueError::Unavailable("enqueue rejected".to_string()));
        }

        let payload = serde_json::to_string(job)?;
        self.state.lock().unwrap().queued.push_front(payload);
        Ok(())
    }

    async fn claim(&self) -> QueueResult<Option<ClaimedJob>> {
        let now = self.now();
        let mut state = self.state.lock().unwrap();

        while let Some(raw) = state.queued.pop_back() {
            match serde_json::from_str::<ThumbnailJob>(&raw) {
                Ok(job) => {
                    state.processing.push((raw.clone(), now));
                    return Ok(Some(ClaimedJob { job, receipt: raw }));
                }
                Err(e) => state.dead.push(DeadLetter {
                    job: None,
                    raw: Some(raw),
                    error: format!("undecodable job: {}", e),
                    failed_at: Utc::now(),
                }),
            }
        }

        Ok(None)
    }

    async fn ack(&self, claimed: &ClaimedJob) -> QueueResult<()> {
        self.check_settle()?;
        let mut state = self.state.lock().unwrap();
        Self::release(&mut state, &claimed.receipt);
        Ok(())
    }

    async fn retry(&self, claimed: &ClaimedJob) -> QueueResult<()> {
        self.check_settle()?;
        let mut next = claimed.job.clone();
        next.attempts += 1;
        let payload = serde_json::to_string(&next)?;

        let mut state = self.state.lock().unwrap();
        if Self::release(&mut state, &claimed.receipt) {
            state.queued.push_front(payload);
        }
        Ok(())
    }

    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> QueueResult<()> {
        self.check_settle()?;
        let mut state = self.state.lock().unwrap();
        if Self::release(&mut state, &claimed.receipt) {
            state.dead.push(DeadLetter {
                job: Some(claimed.job.clone()),
                raw: None,
                error: reason.to_string(),
                failed_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn requeue_stale(&self, visibility_timeout: Duration) -> QueueResult<usize> {
        let now = self.now();
        let mut state = self.state.lock().unwrap();

        let (stale, live): (Vec<_>, Vec<_>) = state
            .processing
            .drain(..)
            .partition(|(_, claimed_at)| now.duration_since(*claimed_at) >= visibility_timeout);
        state.processing = live;

        let moved = stale.len();
        for (raw, _) in stale {
            state.queued.push_back(raw);
        }

        Ok(moved)
    }

    async fn recover_in_flight(&self) -> QueueResult<usize> {
        let mut state = self.state.lock().unwrap();
        let claimed: Vec<(String, Instant)> = state.processing.drain(..).collect();
        let moved = claimed.len();

        for (raw, _) in claimed {
            state.queued.push_back(raw);
        }

        Ok(moved)
    }

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        let state = self.state.lock().unwrap();
        Ok(state.dead.iter().rev().take(limit).cloned().collect())
    }
}
