//! Thumbnail job consumer

use common::{
    error::QueueResult,
    queue::{ClaimedJob, JobQueue, ThumbnailJob},
    repositories::FileStore,
};
use std::{
    future::Future,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{config::WorkerConfig, error::JobError, thumbnail_generator::ThumbnailGenerator};

/// Tries per ack, retry or dead-letter call before giving up
const SETTLE_ATTEMPTS: u32 = 3;
const SETTLE_BACKOFF: Duration = Duration::from_millis(100);

/// What happened to a claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// Queued again carrying the new attempt count
    Requeued { attempts: u32 },
    DeadLettered,
}

pub struct ThumbnailWorker {
    files: Arc<dyn FileStore>,
    queue: Arc<dyn JobQueue>,
    generator: ThumbnailGenerator,
    max_attempts: u32,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl ThumbnailWorker {
    pub fn new(
        files: Arc<dyn FileStore>,
        queue: Arc<dyn JobQueue>,
        generator: ThumbnailGenerator,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            files,
            queue,
            generator,
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval,
            visibility_timeout: config.visibility_timeout,
        }
    }

    /// Process one claimed job and settle it on the queue
    pub async fn handle(&self, claimed: &ClaimedJob) -> QueueResult<JobOutcome> {
        let job = &claimed.job;

        match self.process(job).await {
            Ok(count) => {
                self.settle(job, || self.queue.ack(claimed)).await?;
                info!(
                    file_id = job.file_id,
                    user_id = job.user_id,
                    "Generated {} thumbnails",
                    count
                );
                Ok(JobOutcome::Done)
            }
            Err(e) if e.is_retryable() && job.attempts + 1 < self.max_attempts => {
                let attempts = job.attempts + 1;
                warn!(
                    file_id = job.file_id,
                    "Thumbnail job failed (attempt {}/{}): {}",
                    attempts,
                    self.max_attempts,
                    e
                );
                self.settle(job, || self.queue.retry(claimed)).await?;
                Ok(JobOutcome::Requeued { attempts })
            }
            Err(e) => {
                error!(
                    file_id = job.file_id,
                    user_id = job.user_id,
                    attempts = job.attempts,
                    "Thumbnail job abandoned: {}",
                    e
                );
                let reason = e.to_string();
                self.settle(job, || self.queue.dead_letter(claimed, &reason))
                    .await?;
                Ok(JobOutcome::DeadLettered)
            }
        }
    }

    /// Run a queue call, retrying transient failures with a short back-off
    ///
    /// A claim that still cannot be settled stays in the processing list
    /// until its visibility timeout hands it to another consumer.
    async fn settle<F, Fut>(&self, job: &ThumbnailJob, mut op: F) -> QueueResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueueResult<()>>,
    {
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < SETTLE_ATTEMPTS => {
                    warn!(
                        file_id = job.file_id,
                        "Failed to settle job (attempt {}/{}): {}",
                        attempt,
                        SETTLE_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(SETTLE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn process(&self, job: &ThumbnailJob) -> Result<usize, JobError> {
        let file = self
            .files
            .find_by_id(job.file_id)
            .await?
            .ok_or(JobError::FileNotFound(job.file_id))?;

        if file.user_id != job.user_id {
            return Err(JobError::OwnerMismatch {
                file_id: job.file_id,
                user_id: job.user_id,
            });
        }

        let source = file
            .local_path
            .as_deref()
            .ok_or(JobError::MissingBlob(file.id))?;

        let paths = self.generator.generate(Path::new(source)).await?;
        Ok(paths.len())
    }

    /// Claim and handle jobs until `shutdown` flips to true
    ///
    /// A job already claimed is always settled before the loop exits.
    pub async fn run(&self, consumer: usize, mut shutdown: watch::Receiver<bool>) {
        info!(consumer, "Thumbnail consumer started");

        let reap_every = self.visibility_timeout / 2;
        let mut last_reap: Option<Instant> = None;

        while !*shutdown.borrow() {
            if last_reap.is_none_or(|at| at.elapsed() >= reap_every) {
                if let Err(e) = self.queue.requeue_stale(self.visibility_timeout).await {
                    error!(consumer, "Failed to requeue stale claims: {}", e);
                }
                last_reap = Some(Instant::now());
            }

            match self.queue.claim().await {
                Ok(Some(claimed)) => {
                    if let Err(e) = self.handle(&claimed).await {
                        error!(
                            consumer,
                            file_id = claimed.job.file_id,
                            "Failed to settle job: {}",
                            e
                        );
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(consumer, "Failed to claim job: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(consumer, "Thumbnail consumer stopped");
    }
}

/// Start `concurrency` consumers sharing one worker
pub fn spawn_pool(
    worker: Arc<ThumbnailWorker>,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..concurrency)
        .map(|consumer| {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(consumer, shutdown).await })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        memory::{MemoryFileStore, MemoryJobQueue},
        models::{FileType, NewFile, ROOT_PARENT_ID},
        storage::{BlobStorage, StorageConfig, derivative_path},
    };
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const WIDTHS: [u32; 2] = [8, 4];

    struct Fixture {
        dir: TempDir,
        files: Arc<MemoryFileStore>,
        queue: Arc<MemoryJobQueue>,
        worker: Arc<ThumbnailWorker>,
    }

    impl Fixture {
        fn new(max_attempts: u32) -> Self {
            Self::with_visibility(max_attempts, Duration::from_secs(300))
        }

        fn with_visibility(max_attempts: u32, visibility_timeout: Duration) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let files = Arc::new(MemoryFileStore::new());
            let queue = Arc::new(MemoryJobQueue::new());
            let storage = BlobStorage::new(&StorageConfig {
                root: dir.path().to_path_buf(),
            });
            let config = WorkerConfig {
                max_attempts,
                poll_interval: Duration::from_millis(10),
                visibility_timeout,
                ..WorkerConfig::default()
            };
            let worker = Arc::new(ThumbnailWorker::new(
                files.clone(),
                queue.clone(),
                ThumbnailGenerator::new(storage, WIDTHS.to_vec()),
                &config,
            ));

            Self {
                dir,
                files,
                queue,
                worker,
            }
        }

        async fn image(&self, user_id: i64, blob: Option<PathBuf>) -> i64 {
            let file = self
                .files
                .insert(NewFile {
                    user_id,
                    name: "cat.png".to_string(),
                    file_type: FileType::Image,
                    is_public: false,
                    parent_id: ROOT_PARENT_ID,
                    local_path: blob.map(|p| p.to_string_lossy().into_owned()),
                })
                .await
                .unwrap();
            file.id
        }

        fn png(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            ImageBuffer::from_pixel(16, 16, Rgb([0u8, 128, 255]))
                .save_with_format(&path, ImageFormat::Png)
                .unwrap();
            path
        }

        fn garbage(&self) -> PathBuf {
            let path = self.dir.path().join("garbage-blob");
            std::fs::write(&path, b"not an image").unwrap();
            path
        }

        async fn enqueue(&self, file_id: i64, user_id: i64) {
            self.queue
                .enqueue(&ThumbnailJob::new(file_id, user_id))
                .await
                .unwrap();
        }

        async fn claim(&self) -> ClaimedJob {
            self.queue.claim().await.unwrap().unwrap()
        }

        /// Wait until nothing is queued or claimed
        async fn drained(&self) {
            tokio::time::timeout(Duration::from_secs(30), async {
                while !self.queue.queued().is_empty() || self.queue.in_flight() > 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("queue was not drained in time");
        }
    }

    #[tokio::test]
    async fn test_successful_job_is_acknowledged() {
        let fixture = Fixture::new(3);
        let blob = fixture.png("png-blob");
        let file_id = fixture.image(1, Some(blob.clone())).await;
        fixture.enqueue(file_id, 1).await;

        let claimed = fixture.claim().await;
        let outcome = fixture.worker.handle(&claimed).await.unwrap();

        assert_eq!(outcome, JobOutcome::Done);
        assert_eq!(fixture.queue.in_flight(), 0);
        assert!(fixture.queue.queued().is_empty());
        assert!(fixture.queue.dead().is_empty());
        for width in WIDTHS {
            assert!(derivative_path(&blob, width).exists());
        }
    }

    #[tokio::test]
    async fn test_unknown_file_is_dead_lettered_without_retry() {
        let fixture = Fixture::new(3);
        fixture.enqueue(404, 1).await;

        let claimed = fixture.claim().await;
        let outcome = fixture.worker.handle(&claimed).await.unwrap();

        assert_eq!(outcome, JobOutcome::DeadLettered);
        let dead = fixture.queue.dead();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.as_ref().unwrap().attempts, 0);
        assert!(dead[0].error.contains("not found"));
        assert!(fixture.queue.queued().is_empty());
    }

    #[tokio::test]
    async fn test_owner_mismatch_is_dead_lettered_without_retry() {
        let fixture = Fixture::new(3);
        let file_id = fixture.image(1, Some(fixture.png("png-blob"))).await;
        fixture.enqueue(file_id, 2).await;

        let claimed = fixture.claim().await;
        let outcome = fixture.worker.handle(&claimed).await.unwrap();

        assert_eq!(outcome, JobOutcome::DeadLettered);
        assert_eq!(fixture.queue.dead()[0].job.as_ref().unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_record_without_blob_is_dead_lettered() {
        let fixture = Fixture::new(3);
        let file_id = fixture.image(1, None).await;
        fixture.enqueue(file_id, 1).await;

        let claimed = fixture.claim().await;
        assert_eq!(
            fixture.worker.handle(&claimed).await.unwrap(),
            JobOutcome::DeadLettered
        );
    }

    #[tokio::test]
    async fn test_decode_failure_is_retried_until_budget_is_spent() {
        let fixture = Fixture::new(3);
        let file_id = fixture.image(1, Some(fixture.garbage())).await;
        fixture.enqueue(file_id, 1).await;

        let claimed = fixture.claim().await;
        assert_eq!(
            fixture.worker.handle(&claimed).await.unwrap(),
            JobOutcome::Requeued { attempts: 1 }
        );

        let claimed = fixture.claim().await;
        assert_eq!(claimed.job.attempts, 1);
        assert_eq!(
            fixture.worker.handle(&claimed).await.unwrap(),
            JobOutcome::Requeued { attempts: 2 }
        );

        let claimed = fixture.claim().await;
        assert_eq!(
            fixture.worker.handle(&claimed).await.unwrap(),
            JobOutcome::DeadLettered
        );

        let dead = fixture.queue.dead();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.as_ref().unwrap().attempts, 2);
        assert!(fixture.queue.queued().is_empty());
        assert_eq!(fixture.queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_single_attempt_budget_dead_letters_immediately() {
        let fixture = Fixture::new(1);
        let file_id = fixture.image(1, Some(fixture.garbage())).await;
        fixture.enqueue(file_id, 1).await;

        let claimed = fixture.claim().await;
        assert_eq!(
            fixture.worker.handle(&claimed).await.unwrap(),
            JobOutcome::DeadLettered
        );
    }

    #[tokio::test]
    async fn test_transient_settle_failure_is_retried() {
        let fixture = Fixture::new(3);
        let file_id = fixture.image(1, Some(fixture.png("png-blob"))).await;
        fixture.enqueue(file_id, 1).await;

        let claimed = fixture.claim().await;
        fixture.queue.fail_next_settles(SETTLE_ATTEMPTS as usize - 1);

        assert_eq!(
            fixture.worker.handle(&claimed).await.unwrap(),
            JobOutcome::Done
        );
        assert_eq!(fixture.queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_persistent_settle_failure_leaves_claim_for_requeue() {
        let fixture = Fixture::new(3);
        let file_id = fixture.image(1, Some(fixture.png("png-blob"))).await;
        fixture.enqueue(file_id, 1).await;

        let claimed = fixture.claim().await;
        fixture.queue.fail_next_settles(SETTLE_ATTEMPTS as usize);

        assert!(fixture.worker.handle(&claimed).await.is_err());
        assert_eq!(fixture.queue.in_flight(), 1);

        fixture.queue.advance(Duration::from_secs(301));
        assert_eq!(
            fixture
                .queue
                .requeue_stale(Duration::from_secs(300))
                .await
                .unwrap(),
            1
        );
        assert_eq!(fixture.queue.queued().len(), 1);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let fixture = Fixture::new(3);
        let blob = fixture.png("png-blob");
        for _ in 0..4 {
            let file_id = fixture.image(1, Some(blob.clone())).await;
            fixture.enqueue(file_id, 1).await;
        }
        fixture.enqueue(999, 1).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = spawn_pool(fixture.worker.clone(), 2, shutdown_rx);

        fixture.drained().await;

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(fixture.queue.queued().is_empty());
        assert_eq!(fixture.queue.in_flight(), 0);
        assert_eq!(fixture.queue.dead().len(), 1);
    }

    #[tokio::test]
    async fn test_pool_reclaims_abandoned_job() {
        let fixture = Fixture::with_visibility(3, Duration::from_millis(50));
        let blob = fixture.png("abandoned-blob");
        let file_id = fixture.image(1, Some(blob.clone())).await;
        fixture.enqueue(file_id, 1).await;

        // A consumer that died right after claiming
        let _abandoned = fixture.claim().await;
        assert_eq!(fixture.queue.in_flight(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = spawn_pool(fixture.worker.clone(), 1, shutdown_rx);

        fixture.drained().await;

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(fixture.queue.dead().is_empty());
        for width in WIDTHS {
            assert!(derivative_path(&blob, width).exists());
        }
    }
}
