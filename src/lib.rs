pub mod config;
pub mod core;
pub mod counting;
pub mod models;
pub mod pipeline;

pub use config::Config;
pub use counting::{CountingSession, CrossingGeometry, Orientation};
pub use models::{BoundingBox, CountEvent, CountSummary, Detection, Point};
pub use pipeline::{FrameSink, FrameSource, ObjectTracker, TrackReplayBackend, VideoBackend, VideoInfo};
