use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::Point;

/// Compass code selecting where the counting line sits and which way objects must move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Orientation {
    N,
    S,
    E,
    W,
    NE,
    NW,
    SE,
    SW,
}

impl Orientation {
    pub const ALL: [Orientation; 8] = [
        Orientation::N,
        Orientation::S,
        Orientation::E,
        Orientation::W,
        Orientation::NE,
        Orientation::NW,
        Orientation::SE,
        Orientation::SW,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::N => "N",
            Self::S => "S",
            Self::E => "E",
            Self::W => "W",
            Self::NE => "NE",
            Self::NW => "NW",
            Self::SE => "SE",
            Self::SW => "SW",
        }
    }

    /// Parse a code, falling back to East for anything unrecognised.
    pub fn parse_or_default(code: &str) -> Self {
        code.parse().unwrap_or_else(|_| {
            tracing::warn!(code, "unknown orientation code, using E");
            Orientation::E
        })
    }
}

impl FromStr for Orientation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" => Ok(Self::N),
            "S" => Ok(Self::S),
            "E" => Ok(Self::E),
            "W" => Ok(Self::W),
            "NE" => Ok(Self::NE),
            "NW" => Ok(Self::NW),
            "SE" => Ok(Self::SE),
            "SW" => Ok(Self::SW),
            other => Err(anyhow::anyhow!("Invalid orientation code: {}", other)),
        }
    }
}

impl TryFrom<String> for Orientation {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Orientation> for String {
    fn from(orientation: Orientation) -> Self {
        orientation.as_str().to_string()
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    Horizontal,
    Vertical,
    /// The `/` diagonal, from bottom-left to top-right.
    DiagonalForward,
    /// The `\` diagonal, from top-left to bottom-right.
    DiagonalBackward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountingDirection {
    TopToBottom,
    BottomToTop,
    LeftToRight,
    RightToLeft,
    TopLeftToBottomRight,
    BottomRightToTopLeft,
    BottomLeftToTopRight,
    TopRightToBottomLeft,
}

impl CountingDirection {
    /// Unit step `(dx, dy)` in image coordinates (y grows downwards).
    pub fn step(&self) -> (i32, i32) {
        match self {
            Self::TopToBottom => (0, 1),
            Self::BottomToTop => (0, -1),
            Self::LeftToRight => (1, 0),
            Self::RightToLeft => (-1, 0),
            Self::TopLeftToBottomRight => (1, 1),
            Self::BottomRightToTopLeft => (-1, -1),
            Self::BottomLeftToTopRight => (1, -1),
            Self::TopRightToBottomLeft => (-1, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineGeometry {
    Horizontal { y: i32 },
    Vertical { x: i32 },
    Diagonal { start: Point, end: Point },
}

impl LineGeometry {
    /// Endpoints of the line clipped to the frame, for drawing.
    pub fn endpoints(&self, width: u32, height: u32) -> (Point, Point) {
        match *self {
            Self::Horizontal { y } => (Point::new(0, y), Point::new(width as i32, y)),
            Self::Vertical { x } => (Point::new(x, 0), Point::new(x, height as i32)),
            Self::Diagonal { start, end } => (start, end),
        }
    }
}

/// Arrow drawn on annotated frames to show the counting direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayArrow {
    pub from: Point,
    pub to: Point,
}

/// Everything derived from an orientation for one frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingGeometry {
    pub orientation: Orientation,
    pub line_type: LineType,
    pub direction: CountingDirection,
    pub line: LineGeometry,
    pub arrow: DisplayArrow,
}

const MIN_ARROW_LEN: i32 = 10;

/// Scalar line coordinate at `extent * ratio`, clamped to the pixel range.
fn scaled_coordinate(extent: u32, ratio: f64) -> i32 {
    let max = extent.saturating_sub(1) as f64;
    (extent as f64 * ratio).floor().clamp(0.0, max) as i32
}

/// Resolve an orientation into the counting line for a `width` x `height` frame.
///
/// `ratio` positions horizontal and vertical lines and is expected in `[0, 1]`;
/// it is not used for diagonal orientations, which always run corner to corner.
pub fn resolve(orientation: Orientation, width: u32, height: u32, ratio: f64) -> CrossingGeometry {
    let (w, h) = (width as i32, height as i32);
    let falling = LineGeometry::Diagonal {
        start: Point::new(0, 0),
        end: Point::new(w, h),
    };
    let rising = LineGeometry::Diagonal {
        start: Point::new(0, h),
        end: Point::new(w, 0),
    };

    let (line_type, direction, line) = match orientation {
        Orientation::N => (
            LineType::Horizontal,
            CountingDirection::BottomToTop,
            LineGeometry::Horizontal { y: scaled_coordinate(height, ratio) },
        ),
        Orientation::S => (
            LineType::Horizontal,
            CountingDirection::TopToBottom,
            LineGeometry::Horizontal { y: scaled_coordinate(height, ratio) },
        ),
        Orientation::E => (
            LineType::Vertical,
            CountingDirection::LeftToRight,
            LineGeometry::Vertical { x: scaled_coordinate(width, ratio) },
        ),
        Orientation::W => (
            LineType::Vertical,
            CountingDirection::RightToLeft,
            LineGeometry::Vertical { x: scaled_coordinate(width, ratio) },
        ),
        Orientation::SE => (LineType::DiagonalBackward, CountingDirection::TopLeftToBottomRight, falling),
        Orientation::NW => (LineType::DiagonalBackward, CountingDirection::BottomRightToTopLeft, falling),
        Orientation::NE => (LineType::DiagonalForward, CountingDirection::BottomLeftToTopRight, rising),
        Orientation::SW => (LineType::DiagonalForward, CountingDirection::TopRightToBottomLeft, rising),
    };

    CrossingGeometry {
        orientation,
        line_type,
        direction,
        line,
        arrow: arrow_for(&line, direction, width, height),
    }
}

fn arrow_for(line: &LineGeometry, direction: CountingDirection, width: u32, height: u32) -> DisplayArrow {
    let (a, b) = line.endpoints(width, height);
    let mid = Point::new((a.x + b.x) / 2, (a.y + b.y) / 2);
    let len = ((width.min(height) / 8) as i32).max(MIN_ARROW_LEN);
    let (dx, dy) = direction.step();
    // Diagonal steps are shortened so every arrow has roughly the same length.
    let half = if dx != 0 && dy != 0 { len * 7 / 20 } else { len / 2 };
    DisplayArrow {
        from: Point::new(mid.x - dx * half, mid.y - dy * half),
        to: Point::new(mid.x + dx * half, mid.y + dy * half),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn south_is_horizontal_top_to_bottom() {
        let geometry = resolve(Orientation::S, 640, 480, 0.5);
        assert_eq!(geometry.line_type, LineType::Horizontal);
        assert_eq!(geometry.direction, CountingDirection::TopToBottom);
        assert_eq!(geometry.line, LineGeometry::Horizontal { y: 240 });
    }

    #[test]
    fn east_and_west_are_vertical() {
        let east = resolve(Orientation::E, 640, 480, 0.25);
        assert_eq!(east.line, LineGeometry::Vertical { x: 160 });
        assert_eq!(east.direction, CountingDirection::LeftToRight);

        let west = resolve(Orientation::W, 640, 480, 0.25);
        assert_eq!(west.line, LineGeometry::Vertical { x: 160 });
        assert_eq!(west.direction, CountingDirection::RightToLeft);
    }

    #[test]
    fn ratio_one_is_clamped_into_frame() {
        let geometry = resolve(Orientation::N, 640, 480, 1.0);
        assert_eq!(geometry.line, LineGeometry::Horizontal { y: 479 });
        let geometry = resolve(Orientation::N, 640, 480, 3.0);
        assert_eq!(geometry.line, LineGeometry::Horizontal { y: 479 });
        let geometry = resolve(Orientation::E, 640, 480, -1.0);
        assert_eq!(geometry.line, LineGeometry::Vertical { x: 0 });
    }

    #[test]
    fn diagonals_span_corners_and_ignore_ratio() {
        let se = resolve(Orientation::SE, 640, 480, 0.1);
        assert_eq!(se.line_type, LineType::DiagonalBackward);
        assert_eq!(
            se.line,
            LineGeometry::Diagonal { start: Point::new(0, 0), end: Point::new(640, 480) }
        );
        assert_eq!(se, resolve(Orientation::SE, 640, 480, 0.9));

        let ne = resolve(Orientation::NE, 640, 480, 0.5);
        assert_eq!(ne.line_type, LineType::DiagonalForward);
        assert_eq!(
            ne.line,
            LineGeometry::Diagonal { start: Point::new(0, 480), end: Point::new(640, 0) }
        );
        assert_eq!(resolve(Orientation::SW, 640, 480, 0.5).line, ne.line);
        assert_eq!(resolve(Orientation::NW, 640, 480, 0.5).line, se.line);
    }

    #[test]
    fn resolution_is_deterministic() {
        for orientation in Orientation::ALL {
            assert_eq!(
                resolve(orientation, 1920, 1080, 0.4),
                resolve(orientation, 1920, 1080, 0.4)
            );
        }
    }

    #[test]
    fn codes_parse_case_insensitively_with_east_fallback() {
        assert_eq!("se".parse::<Orientation>().unwrap(), Orientation::SE);
        assert_eq!(" Nw ".parse::<Orientation>().unwrap(), Orientation::NW);
        assert!("up".parse::<Orientation>().is_err());
        assert_eq!(Orientation::parse_or_default("up"), Orientation::E);
        assert_eq!(Orientation::parse_or_default("w"), Orientation::W);
    }

    #[test]
    fn arrow_points_along_counting_direction() {
        let geometry = resolve(Orientation::S, 640, 480, 0.5);
        assert_eq!(geometry.arrow.from.x, geometry.arrow.to.x);
        assert!(geometry.arrow.to.y > geometry.arrow.from.y);

        let geometry = resolve(Orientation::NE, 640, 480, 0.5);
        assert!(geometry.arrow.to.x > geometry.arrow.from.x);
        assert!(geometry.arrow.to.y < geometry.arrow.from.y);
    }
}
