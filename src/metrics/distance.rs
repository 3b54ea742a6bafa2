use crate::error::{DetectError, Result};

/// Focal length assumed for the keypoint (eye) estimate, in pixels.
pub const EYE_FOCAL_LENGTH_PX: f64 = 700.0;
/// Average human interpupillary distance in centimeters.
pub const REAL_EYE_DISTANCE_CM: f64 = 6.3;

/// Focal length assumed for the landmark (cheek) estimate, in pixels.
pub const FACE_FOCAL_LENGTH_PX: f64 = 600.0;
/// Average adult face width, cheek to cheek, in centimeters.
pub const KNOWN_FACE_WIDTH_CM: f64 = 16.0;

/// Euclidean distance between two pixel coordinates.
pub fn pixel_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// Pinhole-camera estimate of the distance to a face, in centimeters.
pub fn distance_from_pixels(pixel_distance: f64, focal_length_px: f64, reference_cm: f64) -> Result<f64> {
    if pixel_distance == 0.0 {
        return Err(DetectError::CoincidentKeypoints);
    }
    Ok((focal_length_px * reference_cm) / pixel_distance)
}

/// Estimate camera distance from two reference keypoints a known real-world length apart.
///
/// Coincident keypoints have no defined distance and are reported as
/// [`DetectError::CoincidentKeypoints`]. Any other result is returned as-is.
pub fn calculate_distance(
    a: (f64, f64),
    b: (f64, f64),
    focal_length_px: f64,
    reference_cm: f64,
) -> Result<f64> {
    distance_from_pixels(pixel_distance(a, b), focal_length_px, reference_cm)
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
