pub mod annotate;
pub mod crossing;
pub mod geometry;
pub mod session;

pub use annotate::Annotator;
pub use crossing::has_crossed;
pub use geometry::{
    CountingDirection, CrossingGeometry, DisplayArrow, LineGeometry, LineType, Orientation, resolve,
};
pub use session::{CountingSession, SessionConfig, SessionError, SessionState};
