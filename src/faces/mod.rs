//! Face detection backends.
//!
//! Handlers only see the [`KeypointDetector`] and [`LandmarkDetector`]
//! traits; the ONNX-backed implementations live in [`blazeface`] and
//! [`mesh`].

pub mod blazeface;
pub mod mesh;
pub mod models;

use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;

pub use blazeface::BlazeFaceDetector;
pub use mesh::FaceMeshDetector;

/// Bounding box for a detected face, in pixels.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A face reported by a keypoint detector.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetectedFace {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Named keypoints as `[x, y]` pixel coordinates.
    pub keypoints: BTreeMap<String, [i32; 2]>,
}

impl DetectedFace {
    pub fn keypoint(&self, name: &str) -> Option<(f64, f64)> {
        self.keypoints
            .get(name)
            .map(|[x, y]| (f64::from(*x), f64::from(*y)))
    }
}

/// One landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Dense landmark mesh for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMesh {
    pub landmarks: Vec<Landmark>,
    pub presence: f32,
}

/// Detector returning named keypoints per face.
pub trait KeypointDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>>;
}

/// Detector returning a landmark mesh per face.
pub trait LandmarkDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceMesh>>;
}

/// Settings for the landmark pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshOptions {
    pub max_num_faces: usize,
    pub min_detection_confidence: f32,
    /// Accept meshes carrying the refined iris landmarks (478 points).
    pub refine_landmarks: bool,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            max_num_faces: 5,
            min_detection_confidence: 0.5,
            refine_landmarks: true,
        }
    }
}

/// Intersection over Union of two `[x_min, y_min, x_max, y_max]` boxes.
pub(crate) fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-100.0, 100.0)).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&a, &a) - 1.0).abs() < 0.001);

        let c = [20.0, 20.0, 30.0, 30.0];
        assert!((iou(&a, &c) - 0.0).abs() < 0.001);

        let d = [5.0, 0.0, 15.0, 10.0];
        assert!((iou(&a, &d) - 50.0 / 150.0).abs() < 0.001);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(1000.0) > 0.999);
        assert!(sigmoid(-1000.0) < 0.001);
    }

    #[test]
    fn test_keypoint_lookup() {
        let face = DetectedFace {
            bbox: BoundingBox { x: 0, y: 0, width: 10, height: 10 },
            confidence: 0.9,
            keypoints: BTreeMap::from([("left_eye".to_string(), [3, 4])]),
        };
        assert_eq!(face.keypoint("left_eye"), Some((3.0, 4.0)));
        assert_eq!(face.keypoint("right_eye"), None);

        let json = serde_json::to_value(&face).unwrap();
        assert_eq!(json["box"]["width"], 10);
        assert_eq!(json["keypoints"]["left_eye"][1], 4);
    }
}
