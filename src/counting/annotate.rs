use std::collections::HashSet;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use crate::counting::geometry::CrossingGeometry;
use crate::models::{Detection, Point};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const COUNTED_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const CENTER_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const ARROW_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Draws boxes, the counting line and the direction arrow onto frames.
///
/// Text (labels and the running total) is only drawn when a font was loaded.
pub struct Annotator {
    font: Option<FontVec>,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("has_font", &self.font.is_some())
            .finish()
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self { font: None }
    }

    /// Load a TrueType/OpenType font for labels.
    pub fn with_font_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path.as_ref())
            .with_context(|| format!("Failed to read font {:?}", path.as_ref()))?;
        Self::with_font_data(bytes).with_context(|| format!("Invalid font {:?}", path.as_ref()))
    }

    pub fn with_font_data(bytes: Vec<u8>) -> anyhow::Result<Self> {
        let font = FontVec::try_from_vec(bytes).map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(Self { font: Some(font) })
    }

    pub fn draw(
        &self,
        canvas: &mut RgbImage,
        detections: &[Detection],
        counted: &HashSet<i64>,
        geometry: &CrossingGeometry,
        total: u64,
    ) {
        for detection in detections {
            let is_counted = detection
                .track_id
                .map(|id| counted.contains(&id))
                .unwrap_or(false);
            let color = if is_counted { COUNTED_COLOR } else { BOX_COLOR };
            let (x1, y1, _, _) = detection.bbox.to_pixels();
            let rect = Rect::at(x1, y1).of_size(detection.bbox.width().max(1), detection.bbox.height().max(1));
            draw_hollow_rect_mut(canvas, rect, color);

            let center = detection.bbox.center();
            draw_filled_circle_mut(canvas, (center.x, center.y), 4, CENTER_COLOR);

            if let Some(font) = &self.font {
                let label = match detection.track_id {
                    Some(id) => format!("{} {:.2} ID:{}", detection.class_label, detection.confidence, id),
                    None => format!("{} {:.2}", detection.class_label, detection.confidence),
                };
                draw_text_mut(canvas, color, x1, (y1 - 16).max(0), PxScale::from(14.0), font, &label);
            }
        }

        let (start, end) = geometry.line.endpoints(canvas.width(), canvas.height());
        thick_segment(canvas, start, end, LINE_COLOR);
        draw_arrow(canvas, geometry.arrow.from, geometry.arrow.to, ARROW_COLOR);

        if let Some(font) = &self.font {
            draw_text_mut(canvas, TEXT_COLOR, 10, 10, PxScale::from(28.0), font, &format!("Total: {}", total));
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

fn as_f32(p: Point) -> (f32, f32) {
    (p.x as f32, p.y as f32)
}

fn thick_segment(canvas: &mut RgbImage, start: Point, end: Point, color: Rgb<u8>) {
    for offset in [-1, 0, 1] {
        let a = Point::new(start.x + offset, start.y + offset);
        let b = Point::new(end.x + offset, end.y + offset);
        draw_line_segment_mut(canvas, as_f32(a), as_f32(b), color);
    }
}

fn draw_arrow(canvas: &mut RgbImage, from: Point, to: Point, color: Rgb<u8>) {
    thick_segment(canvas, from, to, color);

    let (dx, dy) = ((to.x - from.x) as f32, (to.y - from.y) as f32);
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return;
    }
    let (ux, uy) = (dx / len, dy / len);
    let head = (len * 0.3).max(4.0);
    // Two barbs at +/- 30 degrees back from the tip.
    let (cos, sin) = (0.866_f32, 0.5_f32);
    for sign in [1.0_f32, -1.0] {
        let bx = -(ux * cos - sign * uy * sin) * head;
        let by = -(sign * ux * sin + uy * cos) * head;
        let tip = as_f32(to);
        draw_line_segment_mut(canvas, tip, (tip.0 + bx, tip.1 + by), color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting::geometry::{Orientation, resolve};
    use crate::models::BoundingBox;

    #[test]
    fn draws_line_and_highlights_counted_tracks() {
        let geometry = resolve(Orientation::S, 64, 48, 0.5);
        let mut canvas = RgbImage::new(64, 48);
        let detections = vec![
            Detection {
                bbox: BoundingBox::new(2.0, 2.0, 12.0, 12.0),
                class_label: "cow".into(),
                confidence: 0.9,
                track_id: Some(1),
            },
            Detection {
                bbox: BoundingBox::new(40.0, 30.0, 50.0, 40.0),
                class_label: "cow".into(),
                confidence: 0.8,
                track_id: Some(2),
            },
        ];
        let counted: HashSet<i64> = [2].into_iter().collect();

        Annotator::new().draw(&mut canvas, &detections, &counted, &geometry, 1);

        assert_eq!(*canvas.get_pixel(0, 24), LINE_COLOR);
        assert_eq!(*canvas.get_pixel(2, 5), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(40, 35), COUNTED_COLOR);
    }

    #[test]
    fn rejects_garbage_font_data() {
        assert!(Annotator::with_font_data(vec![0u8; 16]).is_err());
    }
}
