use crate::counting::geometry::{CountingDirection, CrossingGeometry, LineGeometry};
use crate::models::Point;

/// Whether moving from `prev` to `curr` crosses the line in the configured direction.
///
/// The arrival side is inclusive, so a centre landing exactly on the line counts.
pub fn has_crossed(prev: Point, curr: Point, geometry: &CrossingGeometry) -> bool {
    match geometry.line {
        LineGeometry::Horizontal { y } => match geometry.direction {
            CountingDirection::TopToBottom => prev.y < y && curr.y >= y,
            CountingDirection::BottomToTop => prev.y > y && curr.y <= y,
            _ => false,
        },
        LineGeometry::Vertical { x } => match geometry.direction {
            CountingDirection::LeftToRight => prev.x < x && curr.x >= x,
            CountingDirection::RightToLeft => prev.x > x && curr.x <= x,
            _ => false,
        },
        LineGeometry::Diagonal { start, end } => {
            crossed_diagonal(prev, curr, start, end, geometry.direction)
        }
    }
}

/// Signed offset of `p` from the line through `start` and `end` (2D cross product).
fn side_of(p: Point, start: Point, end: Point) -> i64 {
    let (lx, ly) = ((end.x - start.x) as i64, (end.y - start.y) as i64);
    let (px, py) = ((p.x - start.x) as i64, (p.y - start.y) as i64);
    lx * py - ly * px
}

// First-order test: a side change plus matching signs of the raw movement deltas.
// Motion nearly parallel to the line can be misjudged.
fn crossed_diagonal(
    prev: Point,
    curr: Point,
    start: Point,
    end: Point,
    direction: CountingDirection,
) -> bool {
    let before = side_of(prev, start, end);
    let after = side_of(curr, start, end);
    let changed_side = (before > 0 && after <= 0) || (before < 0 && after >= 0);
    if !changed_side {
        return false;
    }

    let (dx, dy) = (curr.x - prev.x, curr.y - prev.y);
    match direction {
        CountingDirection::TopLeftToBottomRight => dx > 0 && dy > 0,
        CountingDirection::BottomRightToTopLeft => dx < 0 && dy < 0,
        CountingDirection::BottomLeftToTopRight => dx > 0 && dy < 0,
        CountingDirection::TopRightToBottomLeft => dx < 0 && dy > 0,
        _ => false,
    }
}
