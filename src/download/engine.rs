//! Concurrent download engine with retry, dedup and progress reporting

use anyhow::{Context, Result};
use futures::StreamExt;
use rand::Rng;
use reqwest::Client;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::download::progress::{ProgressTracker, ProgressUpdate, TaskHandle};
use crate::error::DownloadError;
use crate::utils::safe_filename;

/// Initial streaming chunk size; doubled per flush up to [`MAX_CHUNK_SIZE`]
/// so small files stay latency-friendly and large files amortize syscalls.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub save_dir: PathBuf,
    pub num_workers: usize,
    /// Total attempts per task, first try included.
    pub max_retries: u32,
    pub timeout: Duration,
    pub overwrite: bool,
    pub show_progress: bool,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("."),
            num_workers: 8,
            max_retries: 3,
            timeout: Duration::from_secs(15),
            overwrite: false,
            show_progress: true,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

/// Lifecycle of one queued download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Retrying(u32),
    Succeeded,
    Failed(String),
}

/// Terminal report for one task, in submission order.
#[derive(Debug)]
pub struct TaskOutcome {
    pub path: PathBuf,
    pub status: TaskStatus,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

struct QueuedTask {
    handle: TaskHandle,
    url: String,
    path: PathBuf,
    status: TaskStatus,
}

struct EngineInner {
    config: DownloadConfig,
    client: Client,
    semaphore: Semaphore,
    progress: Arc<ProgressTracker>,
    /// Destinations claimed by queued or active tasks this run, so two
    /// tasks never collide on the same file.
    active_paths: Mutex<HashSet<PathBuf>>,
}

/// Downloads a set of (url, name) requests to disk under bounded
/// concurrency, with retry/backoff, per-run destination dedup and live
/// progress, reporting one outcome per task in submission order.
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
    queue: Mutex<Vec<QueuedTask>>,
}

impl DownloadEngine {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tunedl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let progress = Arc::new(ProgressTracker::new(config.show_progress));
        let semaphore = Semaphore::new(config.num_workers.max(1));

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                client,
                semaphore,
                progress,
                active_paths: Mutex::new(HashSet::new()),
            }),
            queue: Mutex::new(Vec::new()),
        })
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.inner.progress.clone()
    }

    /// Register a download. Returns the destination path, or `None` when
    /// the file already exists (overwrite disabled) or another task in
    /// this run already claimed the same destination. Both are
    /// informational skips, not errors.
    pub fn add_task(&self, url: &str, logical_name: &str, suffix: &str) -> Option<PathBuf> {
        let file_name = safe_filename(&format!("{logical_name}{suffix}"));
        let full_path = self.inner.config.save_dir.join(&file_name);

        if !self.inner.config.overwrite && full_path.exists() {
            info!("Skipping existing file: {}", file_name);
            return None;
        }

        {
            let mut active = self.inner.active_paths.lock().unwrap();
            if !active.insert(full_path.clone()) {
                info!("Task already queued for: {}", file_name);
                return None;
            }
        }

        let handle = self.inner.progress.add_task(logical_name, true);
        self.queue.lock().unwrap().push(QueuedTask {
            handle,
            url: url.to_string(),
            path: full_path.clone(),
            status: TaskStatus::Queued,
        });

        Some(full_path)
    }

    /// Run every queued task to a terminal state and return one outcome
    /// per task in submission order; the queue is cleared afterwards.
    /// A single task's failure never aborts its siblings.
    pub async fn execute_tasks(&self) -> Vec<TaskOutcome> {
        let tasks: Vec<QueuedTask> = self.queue.lock().unwrap().drain(..).collect();
        if tasks.is_empty() {
            return Vec::new();
        }

        let total = tasks.len();
        let (job_tx, job_rx) = mpsc::channel::<(usize, QueuedTask)>(total);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, TaskOutcome)>(total);

        let worker_count = self.inner.config.num_workers.clamp(1, total);
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let inner = self.inner.clone();
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    // Hold the receiver lock only while dequeuing.
                    let job = { job_rx.lock().await.recv().await };
                    match job {
                        Some((idx, task)) => {
                            let outcome = run_task(&inner, task).await;
                            let _ = result_tx.send((idx, outcome)).await;
                        }
                        // Sender dropped: no more work, exit cleanly.
                        None => break,
                    }
                }
            }));
        }
        drop(result_tx);

        for (idx, task) in tasks.into_iter().enumerate() {
            let _ = job_tx.send((idx, task)).await;
        }
        // Dropping the sender is the end-of-work marker for idle workers.
        drop(job_tx);

        for worker in workers {
            let _ = worker.await;
        }

        let mut outcomes: Vec<(usize, TaskOutcome)> = Vec::with_capacity(total);
        while let Some(pair) = result_rx.recv().await {
            outcomes.push(pair);
        }
        outcomes.sort_by_key(|(idx, _)| *idx);

        self.inner.progress.finish_overall();
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Drive one task to a terminal state. The concurrency permit is acquired
/// once and held across every retry of this task, never re-acquired per
/// attempt.
async fn run_task(inner: &EngineInner, mut task: QueuedTask) -> TaskOutcome {
    let _permit = inner
        .semaphore
        .acquire()
        .await
        .expect("engine semaphore closed");

    task.status = TaskStatus::Running;
    let mut delay = inner.config.retry_base_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match attempt_download(inner, &task).await {
            Ok(bytes) => {
                inner.progress.finish_task(task.handle);
                debug!("Downloaded {} ({} bytes)", task.path.display(), bytes);
                return TaskOutcome {
                    path: task.path,
                    status: TaskStatus::Succeeded,
                };
            }
            Err(err) => {
                cleanup_partial(&task.path).await;

                if !err.is_retryable() || attempt >= inner.config.max_retries.max(1) {
                    warn!(
                        "Download failed after {} attempt(s): {}: {}",
                        attempt,
                        task.path.display(),
                        err
                    );
                    inner.progress.finish_task(task.handle);
                    return TaskOutcome {
                        path: task.path,
                        status: TaskStatus::Failed(err.to_string()),
                    };
                }

                task.status = TaskStatus::Retrying(attempt);
                warn!(
                    "Attempt {} failed for {}: {}, retrying in {:?}",
                    attempt,
                    task.path.display(),
                    err,
                    delay
                );
                inner.progress.update(
                    task.handle,
                    ProgressUpdate {
                        description: Some(format!("retry {}", attempt)),
                        ..Default::default()
                    },
                );
                tokio::time::sleep(jittered(delay)).await;
                delay = (delay * 2).min(inner.config.retry_max_delay);
            }
        }
    }
}

/// One download attempt: HEAD size lookup, streamed write with growing chunks,
/// progress updates per flushed chunk.
async fn attempt_download(inner: &EngineInner, task: &QueuedTask) -> Result<u64, DownloadError> {
    tokio::fs::create_dir_all(&inner.config.save_dir)
        .await
        .map_err(|source| DownloadError::Filesystem {
            path: inner.config.save_dir.clone(),
            source,
        })?;

    if let Some(total) = remote_size(&inner.client, &task.url).await {
        inner.progress.update(
            task.handle,
            ProgressUpdate {
                total: Some(total),
                ..Default::default()
            },
        );
    }

    let response = inner
        .client
        .get(&task.url)
        .send()
        .await?
        .error_for_status()?;

    let mut file =
        tokio::fs::File::create(&task.path)
            .await
            .map_err(|source| DownloadError::Filesystem {
                path: task.path.clone(),
                source,
            })?;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(DEFAULT_CHUNK_SIZE);
    let mut chunk_size = DEFAULT_CHUNK_SIZE;
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        if buffer.len() >= chunk_size {
            let flushed = buffer.len() as u64;
            flush_buffer(&mut file, &mut buffer, &task.path).await?;
            written += flushed;
            chunk_size = (chunk_size * 2).min(MAX_CHUNK_SIZE);
            inner.progress.update(
                task.handle,
                ProgressUpdate {
                    completed: Some(written),
                    ..Default::default()
                },
            );
        }
    }

    if !buffer.is_empty() {
        written += buffer.len() as u64;
        flush_buffer(&mut file, &mut buffer, &task.path).await?;
    }

    file.flush()
        .await
        .map_err(|source| DownloadError::Filesystem {
            path: task.path.clone(),
            source,
        })?;

    inner.progress.update(
        task.handle,
        ProgressUpdate {
            total: Some(written),
            completed: Some(written),
            ..Default::default()
        },
    );

    Ok(written)
}

async fn flush_buffer(
    file: &mut tokio::fs::File,
    buffer: &mut Vec<u8>,
    path: &std::path::Path,
) -> Result<(), DownloadError> {
    file.write_all(buffer)
        .await
        .map_err(|source| DownloadError::Filesystem {
            path: path.to_path_buf(),
            source,
        })?;
    buffer.clear();
    Ok(())
}

/// Best-effort HEAD request for the remote size. Failure is non-fatal;
/// the download proceeds with an unknown total.
async fn remote_size(client: &Client, url: &str) -> Option<u64> {
    match client.head(url).send().await {
        Ok(response) if response.status().is_success() => response.content_length(),
        Ok(response) => {
            debug!("Size lookup returned {} for {}", response.status(), url);
            None
        }
        Err(err) => {
            debug!("Size lookup failed for {}: {}", url, err);
            None
        }
    }
}

/// Remove a partially written file after a failed attempt.
async fn cleanup_partial(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file: {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => debug!("Failed to remove partial {}: {}", path.display(), err),
    }
}

fn jittered(delay: Duration) -> Duration {
    let jitter_cap = (delay.as_millis() as u64 / 4).max(1);
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(dir: &std::path::Path) -> DownloadConfig {
        DownloadConfig {
            save_dir: dir.to_path_buf(),
            num_workers: 4,
            max_retries: 3,
            timeout: Duration::from_secs(5),
            overwrite: false,
            show_progress: false,
            retry_base_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn test_empty_queue_returns_immediately() {
        let dir = tempdir().unwrap();
        let engine = DownloadEngine::new(test_config(dir.path())).unwrap();
        assert!(engine.execute_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_dedup_by_destination_path() {
        let dir = tempdir().unwrap();
        let engine = DownloadEngine::new(test_config(dir.path())).unwrap();

        let first = engine.add_task("http://localhost/a", "Song - Artist", ".mp3");
        assert!(first.is_some());

        // Different URL, same sanitized destination.
        let second = engine.add_task("http://localhost/b", "Song - Artist", ".mp3");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_existing_file_skipped_without_overwrite() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Song.mp3"), b"already here").unwrap();

        let engine = DownloadEngine::new(test_config(dir.path())).unwrap();
        assert!(engine.add_task("http://localhost/a", "Song", ".mp3").is_none());

        let mut config = test_config(dir.path());
        config.overwrite = true;
        let engine = DownloadEngine::new(config).unwrap();
        assert!(engine.add_task("http://localhost/a", "Song", ".mp3").is_some());
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/song"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/song"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let engine = DownloadEngine::new(test_config(dir.path())).unwrap();
        let dest = engine
            .add_task(&format!("{}/song", server.uri()), "Flaky", ".mp3")
            .unwrap();

        let outcomes = engine.execute_tasks().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].succeeded());
        assert_eq!(std::fs::read(&dest).unwrap(), b"audio bytes");
    }

    #[tokio::test]
    async fn test_permanent_failure_leaves_no_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/song"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.max_retries = 2;
        let engine = DownloadEngine::new(config).unwrap();
        let dest = engine
            .add_task(&format!("{}/song", server.uri()), "Broken", ".mp3")
            .unwrap();

        let outcomes = engine.execute_tasks().await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].status, TaskStatus::Failed(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_outcomes_in_submission_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fast".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let engine = DownloadEngine::new(test_config(dir.path())).unwrap();
        let slow = engine
            .add_task(&format!("{}/slow", server.uri()), "Slow Song", ".mp3")
            .unwrap();
        let fast = engine
            .add_task(&format!("{}/fast", server.uri()), "Fast Song", ".mp3")
            .unwrap();

        let outcomes = engine.execute_tasks().await;
        assert_eq!(outcomes.len(), 2);
        // Submission order, not completion order.
        assert_eq!(outcomes[0].path, slow);
        assert_eq!(outcomes[1].path, fast);
        assert!(outcomes.iter().all(|o| o.succeeded()));
    }

    #[tokio::test]
    async fn test_queue_cleared_after_execute() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let engine = DownloadEngine::new(test_config(dir.path())).unwrap();
        engine
            .add_task(&format!("{}/one", server.uri()), "One", ".mp3")
            .unwrap();

        assert_eq!(engine.execute_tasks().await.len(), 1);
        assert!(engine.execute_tasks().await.is_empty());
    }
}
