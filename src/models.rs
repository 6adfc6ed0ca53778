use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Integer pixel position in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box as reported by the tracker, `(x1, y1)` top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box snapped to the pixel grid, rounding toward negative infinity.
    pub fn to_pixels(&self) -> (i32, i32, i32, i32) {
        (
            self.x1.floor() as i32,
            self.y1.floor() as i32,
            self.x2.floor() as i32,
            self.y2.floor() as i32,
        )
    }

    pub fn width(&self) -> u32 {
        let (x1, _, x2, _) = self.to_pixels();
        (x2 - x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        let (_, y1, _, y2) = self.to_pixels();
        (y2 - y1).max(0) as u32
    }

    /// Integer midpoint of the box (floor division).
    pub fn center(&self) -> Point {
        let (x1, y1, x2, y2) = self.to_pixels();
        Point::new((x1 + x2).div_euclid(2), (y1 + y2).div_euclid(2))
    }
}

/// One detection for one frame, as produced by an [`ObjectTracker`](crate::pipeline::ObjectTracker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_label: String,
    pub confidence: f32,
    /// Identity kept across frames by the tracker. Untracked detections never count.
    #[serde(default)]
    pub track_id: Option<i64>,
}

/// A track crossed the counting line in the configured direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEvent {
    pub track_id: i64,
    pub class_label: String,
    pub frame_index: u64,
}

/// Final tally of a completed counting session. Serialized as the job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSummary {
    pub video: String,
    pub model: String,
    pub total_count: u64,
    pub per_class: BTreeMap<String, u64>,
    pub total_frames: u64,
    pub duration_seconds: u64,
    pub processed_output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_uses_floor_midpoint() {
        let bbox = BoundingBox::new(10.0, 20.0, 15.0, 31.0);
        assert_eq!(bbox.center(), Point::new(12, 25));
    }

    #[test]
    fn negative_coordinates_round_down() {
        let bbox = BoundingBox::new(-0.5, -3.2, 4.0, 2.0);
        assert_eq!(bbox.to_pixels(), (-1, -4, 4, 2));
        // (-1 + 4) / 2 and (-4 + 2) / 2, both floored.
        assert_eq!(bbox.center(), Point::new(1, -1));
    }

    #[test]
    fn center_truncates_fractional_coordinates() {
        let bbox = BoundingBox::new(90.7, 220.2, 110.9, 240.8);
        assert_eq!(bbox.center(), Point::new(100, 230));
    }

    #[test]
    fn detection_without_track_id_deserializes() {
        let json = r#"{"bbox":{"x1":0,"y1":0,"x2":4,"y2":4},"class_label":"cow","confidence":0.9}"#;
        let detection: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(detection.track_id, None);
        assert_eq!(detection.bbox.width(), 4);
    }
}
