use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::core::job::ModelChoice;
use crate::models::Detection;

/// Stream properties reported by the decoder before the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container estimate; the real count is only known once the source is exhausted.
    pub frame_count: u64,
}

/// Decoded frames, pulled in stream order.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Detector plus tracker. Must keep track identities stable across calls.
pub trait ObjectTracker: Send {
    fn track(&mut self, frame_index: u64, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// Receives annotated frames of the same size as the input.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and return the path of the produced artifact.
    fn finish(self: Box<Self>) -> Result<PathBuf>;
}

pub struct OpenedVideo {
    pub info: VideoInfo,
    pub frames: Box<dyn FrameSource>,
    pub tracker: Box<dyn ObjectTracker>,
}

/// Opens videos and creates annotated-output sinks.
pub trait VideoBackend: Send + Sync + 'static {
    fn open(&self, path: &Path, model: ModelChoice) -> Result<OpenedVideo>;
    fn create_sink(&self, output: &Path, info: &VideoInfo) -> Result<Box<dyn FrameSink>>;
}

/// First line of a track file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackFileHeader {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub frame_count: u64,
}

fn default_fps() -> f64 {
    30.0
}

/// Every following line of a track file: detections of one frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackFileFrame {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Replays detections recorded by an external tracker from a JSON-lines file.
///
/// Frames are blank canvases of the recorded size, so annotated output shows
/// only the overlay.
#[derive(Debug, Clone, Default)]
pub struct TrackReplayBackend;

struct ReplayReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl ReplayReader {
    fn next_record(&mut self) -> Result<Option<TrackFileFrame>> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            let line = line.with_context(|| format!("Failed to read {:?}", self.path))?;
            if line.trim().is_empty() {
                continue;
            }
            let frame = serde_json::from_str(&line).with_context(|| {
                format!("Invalid frame record at {:?}:{}", self.path, self.line_no)
            })?;
            return Ok(Some(frame));
        }
        Ok(None)
    }
}

struct ReplayFrames {
    reader: ReplayReader,
    width: u32,
    height: u32,
    pending: std::sync::Arc<std::sync::Mutex<Option<Vec<Detection>>>>,
}

struct ReplayTracker {
    pending: std::sync::Arc<std::sync::Mutex<Option<Vec<Detection>>>>,
}

impl FrameSource for ReplayFrames {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(record) = self.reader.next_record()? else {
            return Ok(None);
        };
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow::anyhow!("Replay state poisoned"))?;
        *pending = Some(record.detections);
        Ok(Some(RgbImage::new(self.width, self.height)))
    }
}

impl ObjectTracker for ReplayTracker {
    fn track(&mut self, frame_index: u64, _frame: &RgbImage) -> Result<Vec<Detection>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow::anyhow!("Replay state poisoned"))?;
        pending
            .take()
            .ok_or_else(|| anyhow::anyhow!("No recorded detections for frame {}", frame_index))
    }
}

impl VideoBackend for TrackReplayBackend {
    fn open(&self, path: &Path, model: ModelChoice) -> Result<OpenedVideo> {
        let file = File::open(path).with_context(|| format!("Failed to open track file {:?}", path))?;
        let mut lines = BufReader::new(file).lines();
        let header_line = lines
            .next()
            .ok_or_else(|| anyhow::anyhow!("Track file is empty: {:?}", path))?
            .with_context(|| format!("Failed to read {:?}", path))?;
        let header: TrackFileHeader = serde_json::from_str(&header_line)
            .with_context(|| format!("Invalid track file header in {:?}", path))?;

        tracing::debug!(?path, weights = model.weights_file(), width = header.width, height = header.height, "opened track replay");

        let pending = std::sync::Arc::new(std::sync::Mutex::new(None));
        Ok(OpenedVideo {
            info: VideoInfo {
                width: header.width,
                height: header.height,
                fps: header.fps,
                frame_count: header.frame_count,
            },
            frames: Box::new(ReplayFrames {
                reader: ReplayReader {
                    path: path.to_path_buf(),
                    lines,
                    line_no: 1,
                },
                width: header.width,
                height: header.height,
                pending: pending.clone(),
            }),
            tracker: Box::new(ReplayTracker { pending }),
        })
    }

    fn create_sink(&self, output: &Path, _info: &VideoInfo) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(PngSequenceSink::create(output)?))
    }
}

/// Writes annotated frames as `frame_000001.png`, `frame_000002.png`, ...
pub struct PngSequenceSink {
    output_dir: PathBuf,
    written: u64,
}

impl PngSequenceSink {
    /// The directory must be empty or non-existent.
    pub fn create(output_dir: &Path) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Output directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(output_dir)?;
        }
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            written: 0,
        })
    }
}

impl FrameSink for PngSequenceSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.written += 1;
        let path = self.output_dir.join(format!("frame_{:06}.png", self.written));
        frame
            .save(&path)
            .map_err(|e| anyhow::anyhow!("Failed to save frame {:?}: {}", path, e))
    }

    fn finish(self: Box<Self>) -> Result<PathBuf> {
        Ok(self.output_dir)
    }
}
