pub mod distance;
pub mod framing;

pub use distance::{calculate_distance, pixel_distance, round2};
pub use framing::{assess, Framing, Point, Rect};
