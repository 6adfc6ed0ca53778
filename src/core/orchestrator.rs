use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use tempdir::TempDir;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;

use crate::core::db::{JobRecord, JobRepository};
use crate::core::job::{ConfigError, JobRequest, VideoRef};
use crate::core::progress::ProgressManager;
use crate::core::storage::{RemoteStorage, TransferProgress};
use crate::counting::{Annotator, CountingSession};
use crate::models::CountSummary;
use crate::pipeline::{FrameSink, FrameSource, ObjectTracker, OpenedVideo, VideoBackend};

const REMOTE_OUTPUT_DIR: &str = "processed";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Jobs allowed to run at once; further submissions are rejected.
    pub max_concurrent_jobs: usize,
    /// Progress is persisted (and cancellation polled) every this many frames.
    pub progress_stride: u64,
    /// Where annotated output is kept when no remote storage is configured.
    pub output_dir: PathBuf,
    pub font: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            progress_stride: 1,
            output_dir: PathBuf::from("processed"),
            font: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Job '{0}' is already being processed")]
    Conflict(String),

    #[error("Worker pool is full ({0} jobs running)")]
    Busy(usize),

    #[error("Video not found: {0:?}")]
    VideoNotFound(PathBuf),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug)]
enum JobOutcome {
    Completed(CountSummary),
    Cancelled,
}

enum Upload {
    Done,
    Refused,
    Cancelled,
}

/// Accepts counting jobs and runs each one on its own worker task.
pub struct Orchestrator<R, B> {
    inner: Arc<Inner<R, B>>,
}

impl<R, B> Clone for Orchestrator<R, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<R, B> {
    manager: ProgressManager<R>,
    backend: Arc<B>,
    storage: Option<Arc<dyn RemoteStorage>>,
    config: OrchestratorConfig,
    permits: Arc<Semaphore>,
    /// Names whose worker task is still alive. A cancelled record is not
    /// active, but its worker may still be unwinding.
    live_jobs: Mutex<HashSet<String>>,
}

impl<R: JobRepository, B: VideoBackend> Orchestrator<R, B> {
    pub fn new(
        manager: ProgressManager<R>,
        backend: Arc<B>,
        storage: Option<Arc<dyn RemoteStorage>>,
        config: OrchestratorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                manager,
                backend,
                storage,
                config,
                permits,
                live_jobs: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn manager(&self) -> &ProgressManager<R> {
        &self.inner.manager
    }

    /// Start processing `request` in the background.
    ///
    /// The returned handle resolves once the job record is terminal and the
    /// worker is gone; callers may drop it and poll [`status`](Self::status).
    pub async fn submit(&self, request: JobRequest) -> Result<JoinHandle<()>, SubmitError> {
        request.config.validate()?;
        if let VideoRef::Local(path) = &request.video {
            if !path.is_file() {
                return Err(SubmitError::VideoNotFound(path.clone()));
            }
        }

        let mut live = self.inner.live_jobs.lock().await;
        let name = request.name.as_str();
        if live.contains(name) || self.inner.manager.is_active(name).await? {
            return Err(SubmitError::Conflict(name.to_string()));
        }
        let permit = self
            .inner
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| SubmitError::Busy(self.inner.config.max_concurrent_jobs))?;
        // Another process may have claimed the name since the check above.
        if !self.inner.manager.start(name).await? {
            return Err(SubmitError::Conflict(name.to_string()));
        }
        live.insert(name.to_string());
        drop(live);

        let inner = self.inner.clone();
        Ok(tokio::spawn(async move {
            let _permit = permit;
            inner.supervise(request).await;
        }))
    }

    pub async fn status(&self, name: &str) -> anyhow::Result<JobRecord> {
        self.inner.manager.status(name).await
    }

    pub async fn cancel(&self, name: &str) -> anyhow::Result<bool> {
        self.inner.manager.cancel(name).await
    }
}

/// Forwards transfer progress into the job's status message.
struct ProgressForwarder {
    tx: mpsc::UnboundedSender<u64>,
    last: AtomicU64,
    task: JoinHandle<()>,
}

impl ProgressForwarder {
    fn spawn<R: JobRepository>(manager: ProgressManager<R>, name: String, label: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let task = tokio::spawn(async move {
            while let Some(percent) = rx.recv().await {
                let message = format!("{}: {}%", label, percent);
                if let Err(e) = manager.set_status_message(&name, &message).await {
                    tracing::warn!(job = %name, error = %e, "failed to store transfer progress");
                }
            }
        });
        Self {
            tx,
            last: AtomicU64::new(u64::MAX),
            task,
        }
    }

    fn report(&self, done: u64, total: u64) {
        let percent = if total == 0 { 100 } else { (done * 100 / total).min(100) };
        if self.last.swap(percent, Ordering::Relaxed) != percent {
            let _ = self.tx.send(percent);
        }
    }

    async fn close(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

/// Run decode, tracking, drawing or encoding on the blocking pool.
///
/// A panic is resumed on the calling task so the worker boundary sees it.
async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(anyhow::anyhow!("Blocking frame task did not complete: {}", e)),
    }
}

/// State owned by the frame loop. Moved onto the blocking pool for each frame.
struct FrameWork {
    frames: Box<dyn FrameSource>,
    tracker: Box<dyn ObjectTracker>,
    session: CountingSession,
    sink: Option<Box<dyn FrameSink>>,
}

impl FrameWork {
    /// Process one frame. `Ok(false)` once the source is exhausted.
    fn step(&mut self, frame_index: u64) -> anyhow::Result<bool> {
        let Some(mut frame) = self.frames.next_frame()? else {
            return Ok(false);
        };
        let detections = self.tracker.track(frame_index, &frame)?;
        let canvas = if self.sink.is_some() { Some(&mut frame) } else { None };
        self.session.process_frame(frame_index, &detections, canvas)?;
        if let Some(sink) = self.sink.as_mut() {
            sink.write_frame(&frame)?;
        }
        Ok(true)
    }
}

impl<R: JobRepository, B: VideoBackend> Inner<R, B> {
    /// Worker boundary: every outcome, including a panic, ends in a terminal record.
    async fn supervise(self: Arc<Self>, request: JobRequest) {
        let name = request.name.to_string();
        let worker = {
            let inner = self.clone();
            tokio::spawn(async move { inner.run_job(&request).await })
        };

        let reported = match worker.await {
            Ok(Ok(JobOutcome::Completed(summary))) => {
                tracing::info!(job = %name, total = summary.total_count, frames = summary.total_frames, "counting complete");
                match serde_json::to_value(&summary) {
                    Ok(result) => self.manager.finish(&name, &result).await,
                    Err(e) => self.manager.error(&name, &format!("Failed to encode result: {}", e)).await,
                }
            }
            Ok(Ok(JobOutcome::Cancelled)) => {
                tracing::info!(job = %name, "job stopped after cancellation");
                Ok(())
            }
            Ok(Err(e)) => self.manager.error(&name, &format!("{:#}", e)).await,
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    "Worker panicked while processing the video"
                } else {
                    "Worker was aborted"
                };
                self.manager.error(&name, message).await
            }
        };

        if let Err(e) = reported {
            tracing::error!(job = %name, error = %e, "failed to record job outcome");
        }
        self.live_jobs.lock().await.remove(&name);
    }

    /// `true` if the job was cancelled; the session is moved to Cancelled.
    async fn cancelled(&self, name: &str, session: &mut CountingSession) -> anyhow::Result<bool> {
        if self.manager.should_continue(name).await? {
            return Ok(false);
        }
        session.cancel()?;
        tracing::info!(job = name, "cancellation observed after frame loop");
        Ok(true)
    }

    async fn run_job(&self, request: &JobRequest) -> anyhow::Result<JobOutcome> {
        let name = request.name.as_str();
        let config = &request.config;

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .with_context(|| format!("Failed to create output directory {:?}", self.config.output_dir))?;
        // Dropped on every return path, taking downloads and partial output with it.
        let workdir = TempDir::new_in(&self.config.output_dir, ".job")
            .context("Failed to create job working directory")?;

        let local_video = self.fetch_video(name, &request.video, workdir.path()).await?;

        let backend = self.backend.clone();
        let (path, model) = (local_video.clone(), config.model);
        let OpenedVideo { info, frames, tracker } = run_blocking(move || backend.open(&path, model))
            .await?
            .with_context(|| format!("Failed to open video {:?}", local_video))?;

        let mut session = CountingSession::new(config.session_config(request.video.file_name()));
        if config.annotate {
            let annotator = match &self.config.font {
                Some(font) => {
                    let bytes = tokio::fs::read(font)
                        .await
                        .with_context(|| format!("Failed to read font {:?}", font))?;
                    Annotator::with_font_data(bytes).with_context(|| format!("Invalid font {:?}", font))?
                }
                None => Annotator::new(),
            };
            session = session.with_annotator(annotator);
        }
        session.start(config.model, &info)?;

        let sink = if config.annotate {
            let backend = self.backend.clone();
            let staged_output = workdir.path().join(format!("processed_{}", name));
            Some(run_blocking(move || backend.create_sink(&staged_output, &info)).await??)
        } else {
            None
        };

        tracing::info!(job = name, width = info.width, height = info.height, frames = info.frame_count, "processing video");

        let mut work = FrameWork {
            frames,
            tracker,
            session,
            sink,
        };
        let stride = self.config.progress_stride.max(1);
        let mut frame_index = 0u64;
        loop {
            if frame_index % stride == 0 {
                let estimate = info.frame_count.max(frame_index).max(1);
                if !self.manager.update(name, frame_index, estimate).await? {
                    work.session.cancel()?;
                    tracing::info!(job = name, frame_index, "cancellation observed");
                    return Ok(JobOutcome::Cancelled);
                }
            }

            let (returned, step) = run_blocking(move || {
                let step = work.step(frame_index);
                (work, step)
            })
            .await?;
            work = returned;

            match step {
                Ok(true) => frame_index += 1,
                Ok(false) => break,
                Err(e) => {
                    work.session.fail(e.to_string());
                    return Err(e.context(format!("Processing failed at frame {}", frame_index)));
                }
            }
        }

        let FrameWork { mut session, sink, .. } = work;
        if self.cancelled(name, &mut session).await? {
            return Ok(JobOutcome::Cancelled);
        }

        let processed_output = match sink {
            Some(sink) => {
                let artifact = run_blocking(move || sink.finish()).await??;
                match self.place_output(name, artifact).await? {
                    Some(placed) => Some(placed),
                    None => {
                        session.cancel()?;
                        return Ok(JobOutcome::Cancelled);
                    }
                }
            }
            None => None,
        };

        if config.delete_remote_source {
            if let (VideoRef::Remote(remote), Some(storage)) = (&request.video, &self.storage) {
                // The source is only removed for a job that is still wanted.
                if self.cancelled(name, &mut session).await? {
                    return Ok(JobOutcome::Cancelled);
                }
                if !storage.delete(remote).await? {
                    tracing::warn!(job = name, remote, "remote source could not be deleted");
                }
            }
        }

        Ok(JobOutcome::Completed(session.finish(processed_output)?))
    }

    async fn fetch_video(&self, name: &str, video: &VideoRef, workdir: &Path) -> anyhow::Result<PathBuf> {
        let remote = match video {
            VideoRef::Local(path) => return Ok(path.clone()),
            VideoRef::Remote(remote) => remote,
        };
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No remote storage configured to fetch {}", remote))?;

        let target = workdir.join(video.file_name());
        let forwarder = ProgressForwarder::spawn(self.manager.clone(), name.to_string(), "Downloading");
        let report = |done: u64, total: u64| forwarder.report(done, total);
        let fetched = storage.download(remote, &target, Some(&report)).await;
        forwarder.close().await;

        if !fetched? {
            anyhow::bail!("Failed to download {} from remote storage", remote);
        }
        Ok(target)
    }

    /// Move finished output out of the working directory, uploading it when
    /// remote storage is set. `None` if the job was cancelled meanwhile; nothing
    /// is left behind in that case.
    async fn place_output(&self, name: &str, artifact: PathBuf) -> anyhow::Result<Option<PathBuf>> {
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("processed_{}", name));

        let Some(storage) = &self.storage else {
            let target = self.config.output_dir.join(&file_name);
            if tokio::fs::try_exists(&target).await? {
                anyhow::bail!("Output already exists: {:?}", target);
            }
            if !self.manager.should_continue(name).await? {
                return Ok(None);
            }
            tokio::fs::rename(&artifact, &target)
                .await
                .with_context(|| format!("Failed to move output to {:?}", target))?;
            return Ok(Some(target));
        };

        let remote_root = format!("{}/{}", REMOTE_OUTPUT_DIR, file_name);
        let forwarder = ProgressForwarder::spawn(self.manager.clone(), name.to_string(), "Uploading");
        let uploaded = self
            .upload_artifact(name, storage.as_ref(), &artifact, &remote_root, &forwarder)
            .await;
        forwarder.close().await;

        match uploaded? {
            Upload::Done => Ok(Some(PathBuf::from(remote_root))),
            Upload::Cancelled => Ok(None),
            Upload::Refused => anyhow::bail!("Failed to upload {:?} to remote storage", artifact),
        }
    }

    /// Upload a file, or a frame directory file by file. Cancellation is
    /// checked after every file; on cancel the files already sent are removed.
    async fn upload_artifact(
        &self,
        name: &str,
        storage: &dyn RemoteStorage,
        artifact: &Path,
        remote_root: &str,
        forwarder: &ProgressForwarder,
    ) -> anyhow::Result<Upload> {
        let single_file = tokio::fs::metadata(artifact).await?.is_file();
        let files = if single_file {
            vec![(artifact.to_path_buf(), remote_root.to_string())]
        } else {
            let mut entries = tokio::fs::read_dir(artifact).await?;
            let mut files = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                files.push((entry.path(), format!("{}/{}", remote_root, file_name)));
            }
            files.sort();
            files
        };

        let report = |done: u64, total: u64| forwarder.report(done, total);
        let total = files.len() as u64;
        let mut sent: Vec<&str> = Vec::with_capacity(files.len());
        for (i, (local, remote)) in files.iter().enumerate() {
            // Single files report bytes, frame sequences report files.
            let progress = if single_file { Some(&report as TransferProgress<'_>) } else { None };
            if !storage.upload(local, remote, progress).await? {
                return Ok(Upload::Refused);
            }
            sent.push(remote.as_str());
            if !single_file {
                forwarder.report(i as u64 + 1, total);
            }

            if !self.manager.should_continue(name).await? {
                for remote in sent {
                    if let Err(e) = storage.delete(remote).await {
                        tracing::warn!(job = name, remote, error = %e, "failed to remove output of cancelled job");
                    }
                }
                return Ok(Upload::Cancelled);
            }
        }
        Ok(Upload::Done)
    }
}
