use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use image::RgbImage;

use crate::core::job::ModelChoice;
use crate::counting::annotate::Annotator;
use crate::counting::crossing::has_crossed;
use crate::counting::geometry::{CrossingGeometry, Orientation, resolve};
use crate::models::{CountEvent, CountSummary, Detection, Point};
use crate::pipeline::VideoInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed(_))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid frame size {width}x{height}")]
    InvalidFrameSize { width: u32, height: u32 },

    #[error("Session is {0:?}, expected {1}")]
    InvalidState(SessionState, &'static str),
}

/// How a session places its line and what it counts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub video: String,
    pub orientation: Orientation,
    pub line_position_ratio: f64,
    /// `None` counts every class.
    pub target_classes: Option<HashSet<String>>,
}

struct TrackMemory {
    center: Point,
}

/// Counts tracks crossing the line over one video.
///
/// Each track id is counted at most once for the lifetime of the session,
/// and only the positions of tracks visible in the latest frame are kept.
pub struct CountingSession {
    config: SessionConfig,
    state: SessionState,
    model: Option<ModelChoice>,
    geometry: Option<CrossingGeometry>,
    info: Option<VideoInfo>,
    annotator: Option<Annotator>,
    positions: HashMap<i64, TrackMemory>,
    counted: HashSet<i64>,
    total_count: u64,
    per_class: BTreeMap<String, u64>,
    frames_observed: u64,
}

impl CountingSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Created,
            model: None,
            geometry: None,
            info: None,
            annotator: None,
            positions: HashMap::new(),
            counted: HashSet::new(),
            total_count: 0,
            per_class: BTreeMap::new(),
            frames_observed: 0,
        }
    }

    /// Draw onto the canvases passed to [`process_frame`](Self::process_frame).
    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn geometry(&self) -> Option<&CrossingGeometry> {
        self.geometry.as_ref()
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn per_class(&self) -> &BTreeMap<String, u64> {
        &self.per_class
    }

    /// Number of tracks whose last position is remembered.
    pub fn remembered_tracks(&self) -> usize {
        self.positions.len()
    }

    pub fn start(&mut self, model: ModelChoice, info: &VideoInfo) -> Result<(), SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::InvalidState(self.state.clone(), "Created"));
        }
        if info.width == 0 || info.height == 0 {
            let err = SessionError::InvalidFrameSize {
                width: info.width,
                height: info.height,
            };
            self.state = SessionState::Failed(err.to_string());
            return Err(err);
        }

        let geometry = resolve(
            self.config.orientation,
            info.width,
            info.height,
            self.config.line_position_ratio,
        );
        tracing::debug!(video = %self.config.video, ?geometry, "counting line resolved");

        self.geometry = Some(geometry);
        self.model = Some(model);
        self.info = Some(*info);
        self.state = SessionState::Running;
        Ok(())
    }

    fn counts_class(&self, label: &str) -> bool {
        self.config
            .target_classes
            .as_ref()
            .map(|classes| classes.contains(label))
            .unwrap_or(true)
    }

    /// Feed one frame of detections. Returns the tracks counted in this frame.
    pub fn process_frame(
        &mut self,
        frame_index: u64,
        detections: &[Detection],
        canvas: Option<&mut RgbImage>,
    ) -> Result<Vec<CountEvent>, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidState(self.state.clone(), "Running"));
        }
        let Some(geometry) = self.geometry else {
            return Err(SessionError::InvalidState(self.state.clone(), "resolved geometry"));
        };

        let mut events = Vec::new();
        let mut seen = HashSet::with_capacity(detections.len());

        for detection in detections {
            let Some(track_id) = detection.track_id else {
                continue;
            };
            seen.insert(track_id);
            let center = detection.bbox.center();

            if !self.counted.contains(&track_id) && self.counts_class(&detection.class_label) {
                let crossed = self
                    .positions
                    .get(&track_id)
                    .map(|prev| has_crossed(prev.center, center, &geometry))
                    .unwrap_or(false);
                if crossed {
                    self.counted.insert(track_id);
                    self.total_count += 1;
                    *self.per_class.entry(detection.class_label.clone()).or_insert(0) += 1;
                    tracing::debug!(track_id, class = %detection.class_label, frame_index, "track counted");
                    events.push(CountEvent {
                        track_id,
                        class_label: detection.class_label.clone(),
                        frame_index,
                    });
                }
            }

            self.positions.insert(track_id, TrackMemory { center });
        }

        self.positions.retain(|id, _| seen.contains(id));
        self.frames_observed += 1;

        if let (Some(annotator), Some(canvas)) = (&self.annotator, canvas) {
            annotator.draw(canvas, detections, &self.counted, &geometry, self.total_count);
        }

        Ok(events)
    }

    pub fn cancel(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidState(self.state.clone(), "Running"));
        }
        self.state = SessionState::Cancelled;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed(reason.into());
        }
    }

    /// Complete the session once the frame source is exhausted.
    pub fn finish(&mut self, processed_output: Option<PathBuf>) -> Result<CountSummary, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidState(self.state.clone(), "Running"));
        }
        self.state = SessionState::Completed;

        let fps = self.info.map(|info| info.fps).unwrap_or(0.0);
        let duration_seconds = if fps > 0.0 {
            (self.frames_observed as f64 / fps) as u64
        } else {
            0
        };

        Ok(CountSummary {
            video: self.config.video.clone(),
            model: self.model.map(|m| m.as_str().to_string()).unwrap_or_default(),
            total_count: self.total_count,
            per_class: self.per_class.clone(),
            total_frames: self.frames_observed,
            duration_seconds,
            processed_output,
        })
    }
}
