use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use image::RgbImage;
use linecount::core::db::{JobDb, JobRecord, JobRepository, ProgressUpdate};
use linecount::core::job::ModelChoice;
use linecount::core::storage::TransferProgress;
use linecount::core::{
    JobConfig, JobName, JobRequest, LocalDirStorage, OrchestratorConfig, RemoteStorage, VideoRef,
};
use linecount::counting::Orientation;
use linecount::models::{BoundingBox, Detection};
use linecount::pipeline::{
    FrameSink, ObjectTracker, OpenedVideo, TrackFileFrame, TrackFileHeader, TrackReplayBackend,
    VideoBackend, VideoInfo,
};
use time::OffsetDateTime;
use tokio::sync::{Notify, Semaphore};

/// Creates a JobDb in a fresh temporary directory.
/// Returns both the store and the temp directory (which must be kept alive).
pub async fn create_test_db() -> (Arc<JobDb>, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let db = JobDb::open(dir.path().join("jobs.db"))
        .await
        .expect("Failed to open test job store");
    (Arc::new(db), dir)
}

/// A detection whose box is centred exactly on `(cx, cy)`.
pub fn detection_at(track_id: Option<i64>, class_label: &str, cx: i32, cy: i32) -> Detection {
    let (cx, cy) = (cx as f32, cy as f32);
    Detection {
        bbox: BoundingBox::new(cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0),
        class_label: class_label.to_string(),
        confidence: 0.9,
        track_id,
    }
}

/// Writes a track file for a `width` x `height` video at 10 fps.
pub fn write_track_file(path: &Path, width: u32, height: u32, frames: &[Vec<Detection>]) -> PathBuf {
    let mut file = std::fs::File::create(path).expect("Failed to create track file");
    let header = TrackFileHeader {
        width,
        height,
        fps: 10.0,
        frame_count: frames.len() as u64,
    };
    writeln!(file, "{}", serde_json::to_string(&header).unwrap()).unwrap();
    for detections in frames {
        let frame = TrackFileFrame {
            detections: detections.clone(),
        };
        writeln!(file, "{}", serde_json::to_string(&frame).unwrap()).unwrap();
    }
    path.to_path_buf()
}

/// 640x480 herd for a south-facing line at y=240:
/// cow 1 walks down across the line at frame 2, horse 2 walks up across it,
/// and an untracked cow sits on the line the whole time.
pub fn herd_frames() -> Vec<Vec<Detection>> {
    let ys = [(200, 280), (230, 250), (245, 235), (260, 220)];
    ys.iter()
        .map(|&(cow_y, horse_y)| {
            vec![
                detection_at(Some(1), "cow", 100, cow_y),
                detection_at(Some(2), "horse", 300, horse_y),
                detection_at(None, "cow", 500, 240),
            ]
        })
        .collect()
}

/// Frames with nothing detected, for jobs that must stay busy for a while.
pub fn empty_frames(count: usize) -> Vec<Vec<Detection>> {
    vec![Vec::new(); count]
}

pub fn south_config() -> JobConfig {
    JobConfig::new(Orientation::S)
}

pub fn local_request(name: &str, video: PathBuf, config: JobConfig) -> JobRequest {
    JobRequest {
        name: JobName::new(name).expect("valid job name"),
        video: VideoRef::Local(video),
        config,
    }
}

pub fn orchestrator_config(output_dir: &Path, max_concurrent_jobs: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent_jobs,
        progress_stride: 1,
        output_dir: output_dir.to_path_buf(),
        font: None,
    }
}

/// Number of entries directly under `dir`.
pub fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

/// A checkpoint a worker can be parked at until the test lets it through.
#[derive(Debug)]
pub struct Gate {
    entered: Notify,
    release: Semaphore,
    calls: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// Called by the worker: signals arrival, then waits until opened.
    pub async fn pass(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }

    /// Wait until a worker is parked at the gate.
    pub async fn reached(&self) {
        self.entered.notified().await;
    }

    /// Let every current and future caller through.
    pub fn open(&self) {
        self.release.add_permits(1024);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Directory storage whose transfers can be held at a [`Gate`].
pub struct GatedStorage {
    inner: LocalDirStorage,
    pub download: Option<Arc<Gate>>,
    pub upload: Option<Arc<Gate>>,
}

impl GatedStorage {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalDirStorage::new(root),
            download: None,
            upload: None,
        }
    }
}

#[async_trait]
impl RemoteStorage for GatedStorage {
    async fn upload(&self, local: &Path, remote: &str, progress: Option<TransferProgress<'_>>) -> anyhow::Result<bool> {
        if let Some(gate) = &self.upload {
            gate.pass().await;
        }
        self.inner.upload(local, remote, progress).await
    }

    async fn download(&self, remote: &str, local: &Path, progress: Option<TransferProgress<'_>>) -> anyhow::Result<bool> {
        if let Some(gate) = &self.download {
            gate.pass().await;
        }
        self.inner.download(remote, local, progress).await
    }

    async fn delete(&self, remote: &str) -> anyhow::Result<bool> {
        self.inner.delete(remote).await
    }
}

/// Callback run by [`HookedBackend`] before each frame is tracked.
pub type TrackHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Track replay whose tracker calls a hook first, on the worker's thread.
pub struct HookedBackend {
    hook: TrackHook,
}

impl HookedBackend {
    pub fn new(hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Self { hook: Arc::new(hook) }
    }
}

struct HookedTracker {
    inner: Box<dyn ObjectTracker>,
    hook: TrackHook,
}

impl ObjectTracker for HookedTracker {
    fn track(&mut self, frame_index: u64, frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        (self.hook)(frame_index);
        self.inner.track(frame_index, frame)
    }
}

impl VideoBackend for HookedBackend {
    fn open(&self, path: &Path, model: ModelChoice) -> anyhow::Result<OpenedVideo> {
        let mut video = TrackReplayBackend.open(path, model)?;
        video.tracker = Box::new(HookedTracker {
            inner: video.tracker,
            hook: self.hook.clone(),
        });
        Ok(video)
    }

    fn create_sink(&self, output: &Path, info: &VideoInfo) -> anyhow::Result<Box<dyn FrameSink>> {
        TrackReplayBackend.create_sink(output, info)
    }
}

/// Job store that keeps every status message written through it.
pub struct RecordingRepo {
    inner: JobDb,
    messages: StdMutex<Vec<String>>,
}

impl RecordingRepo {
    pub fn new(inner: JobDb) -> Self {
        Self {
            inner,
            messages: StdMutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl JobRepository for RecordingRepo {
    async fn claim_job(&self, name: &str, started_at: OffsetDateTime, message: &str) -> anyhow::Result<bool> {
        self.inner.claim_job(name, started_at, message).await
    }

    async fn get_job(&self, name: &str) -> anyhow::Result<Option<JobRecord>> {
        self.inner.get_job(name).await
    }

    async fn record_progress(&self, name: &str, update: &ProgressUpdate) -> anyhow::Result<bool> {
        self.inner.record_progress(name, update).await
    }

    async fn record_message(&self, name: &str, message: &str) -> anyhow::Result<bool> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
        self.inner.record_message(name, message).await
    }

    async fn record_finished(&self, name: &str, result: &serde_json::Value) -> anyhow::Result<bool> {
        self.inner.record_finished(name, result).await
    }

    async fn record_failed(&self, name: &str, message: &str, at: OffsetDateTime) -> anyhow::Result<()> {
        self.inner.record_failed(name, message, at).await
    }

    async fn record_cancelled(&self, name: &str, error: &str, message: &str) -> anyhow::Result<bool> {
        self.inner.record_cancelled(name, error, message).await
    }
}
