use serde::Serialize;

/// Width multiplier applied to the cheek-to-cheek distance to estimate face width.
const FACE_WIDTH_FACTOR: f64 = 1.5;
/// Height-to-width ratio of the estimated face box.
const FACE_HEIGHT_FACTOR: f64 = 1.3;
/// Faces whose reference distance is below `width / TOO_FAR_DIVISOR` are too far.
const TOO_FAR_DIVISOR: i64 = 10;
/// The central region spans `1 / CENTER_FRACTION` of each frame dimension.
const CENTER_FRACTION: i64 = 3;

/// Integer pixel position.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Pixel position of a normalized `[0, 1]` coordinate, truncated toward zero.
    pub fn from_normalized(x: f32, y: f32, width: u32, height: u32) -> Self {
        Self {
            x: (f64::from(x) * f64::from(width)) as i64,
            y: (f64::from(y) * f64::from(height)) as i64,
        }
    }

    /// Midpoint of two positions, rounding down.
    pub fn midpoint(a: Self, b: Self) -> Self {
        Self {
            x: (a.x + b.x).div_euclid(2),
            y: (a.y + b.y).div_euclid(2),
        }
    }

    pub fn as_f64(self) -> (f64, f64) {
        (self.x as f64, self.y as f64)
    }
}

/// Axis-aligned pixel rectangle given by its corners.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Rect {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl Rect {
    /// Central third of a `width` x `height` frame.
    pub fn center_region(width: u32, height: u32) -> Self {
        let (w, h) = (i64::from(width), i64::from(height));
        let center_width = w / CENTER_FRACTION;
        let center_height = h / CENTER_FRACTION;
        let (cx, cy) = (w / 2, h / 2);

        Self {
            x1: cx - center_width / 2,
            y1: cy - center_height / 2,
            x2: cx + center_width / 2,
            y2: cy + center_height / 2,
        }
    }

    /// Strict containment: points on the border are outside.
    pub fn strictly_contains(&self, p: Point) -> bool {
        self.x1 < p.x && p.x < self.x2 && self.y1 < p.y && p.y < self.y2
    }
}

/// Framing assessment of one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Framing {
    pub is_centered: bool,
    pub is_too_far: bool,
    pub bounds: Rect,
}

/// Whether the midpoint falls inside the central third of the frame.
pub fn is_centered(mid: Point, width: u32, height: u32) -> bool {
    Rect::center_region(width, height).strictly_contains(mid)
}

/// Whether the reference span is below 10% of the frame width.
pub fn is_too_far(pixel_distance: f64, width: u32) -> bool {
    pixel_distance < (i64::from(width) / TOO_FAR_DIVISOR) as f64
}

/// Heuristic face box derived from the cheek-to-cheek distance, clipped to the frame.
pub fn face_bounds(mid: Point, pixel_distance: f64, width: u32, height: u32) -> Rect {
    let face_width = (pixel_distance * FACE_WIDTH_FACTOR) as i64;
    let face_height = (face_width as f64 * FACE_HEIGHT_FACTOR) as i64;

    Rect {
        x1: (mid.x - face_width / 2).max(0),
        y1: (mid.y - face_height / 2).max(0),
        x2: (mid.x + face_width / 2).min(i64::from(width)),
        y2: (mid.y + face_height / 2).min(i64::from(height)),
    }
}

pub fn assess(mid: Point, pixel_distance: f64, width: u32, height: u32) -> Framing {
    Framing {
        is_centered: is_centered(mid, width, height),
        is_too_far: is_too_far(pixel_distance, width),
        bounds: face_bounds(mid, pixel_distance, width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_region_300() {
        let region = Rect::center_region(300, 300);
        assert_eq!(region, Rect { x1: 100, y1: 100, x2: 200, y2: 200 });
    }

    #[test]
    fn test_is_centered() {
        assert!(is_centered(Point::new(150, 150), 300, 300));
        assert!(!is_centered(Point::new(10, 10), 300, 300));
        // Border points are outside
        assert!(!is_centered(Point::new(100, 150), 300, 300));
        assert!(!is_centered(Point::new(150, 200), 300, 300));
    }

    #[test]
    fn test_is_too_far() {
        assert!(is_too_far(29.0, 300));
        assert!(!is_too_far(31.0, 300));
        assert!(!is_too_far(30.0, 300));
    }

    #[test]
    fn test_too_far_threshold_uses_integer_division() {
        // 305 / 10 == 30
        assert!(!is_too_far(30.2, 305));
    }

    #[test]
    fn test_face_bounds_clipped() {
        // width = 150, height = 195
        let bounds = face_bounds(Point::new(50, 60), 100.0, 300, 300);
        assert_eq!(bounds, Rect { x1: 0, y1: 0, x2: 125, y2: 157 });

        let bounds = face_bounds(Point::new(280, 290), 100.0, 300, 300);
        assert_eq!(bounds.x2, 300);
        assert_eq!(bounds.y2, 300);
    }

    #[test]
    fn test_midpoint_rounds_down() {
        assert_eq!(Point::midpoint(Point::new(1, 2), Point::new(4, 5)), Point::new(2, 3));
        assert_eq!(Point::midpoint(Point::new(-3, 0), Point::new(0, 0)), Point::new(-2, 0));
    }

    #[test]
    fn test_from_normalized_truncates() {
        assert_eq!(Point::from_normalized(0.5, 0.999, 301, 100), Point::new(150, 99));
    }
}
