use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ort::session::Session;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::models::{ensure_model, image_tensor, load_session, run_flat};
use super::{iou, sigmoid, BoundingBox, DetectedFace, KeypointDetector};
use crate::config::{ModelsConfig, TensorLayout};
use crate::error::DetectError;

/// Input image size for BlazeFace.
pub const INPUT_SIZE: u32 = 128;

/// Number of anchor boxes (detections).
const NUM_ANCHORS: usize = 896;

/// Regressor values per anchor: box (4) + six keypoints (12).
const NUM_COORDS: usize = 16;

/// Confidence threshold for face detection.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.75;

/// Non-maximum suppression IOU threshold.
const NMS_THRESHOLD: f32 = 0.3;

/// Keypoint names in model output order.
pub const KEYPOINT_NAMES: [&str; 6] = [
    "right_eye",
    "left_eye",
    "nose",
    "mouth",
    "right_ear",
    "left_ear",
];

/// Raw detection in normalized `[0, 1]` coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BlazeDetection {
    /// `[x_min, y_min, x_max, y_max]`
    pub bbox: [f32; 4],
    pub score: f32,
    pub keypoints: [[f32; 2]; 6],
}

/// BlazeFace short-range detector running on ONNX Runtime.
pub struct BlazeFaceDetector {
    session: Mutex<Session>,
    layout: TensorLayout,
    score_threshold: f32,
    max_faces: Option<usize>,
    anchors: Vec<[f32; 2]>,
}

impl BlazeFaceDetector {
    pub fn new(session: Session, layout: TensorLayout) -> Self {
        Self {
            session: Mutex::new(session),
            layout,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            max_faces: None,
            anchors: generate_anchors(),
        }
    }

    /// Load the configured face detection model.
    pub fn load(models: &ModelsConfig) -> Result<Self> {
        let path = ensure_model(models, &models.face_detector)?;
        let session = load_session(&path)?;
        tracing::info!(model = ?path, "Face detection model loaded");
        Ok(Self::new(session, models.face_detector.layout))
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_max_faces(mut self, max_faces: usize) -> Self {
        self.max_faces = Some(max_faces);
        self
    }

    /// Detect faces, returning normalized boxes and keypoints sorted by score.
    pub fn detect_normalized(&self, img: &RgbImage) -> Result<Vec<BlazeDetection>> {
        let resized = image::imageops::resize(img, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        // Normalize to [-1, 1]
        let input = image_tensor(&resized, self.layout, |v| f32::from(v) / 127.5 - 1.0)?;

        let outputs = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;
            run_flat(&mut session, input)?
        };

        let boxes = outputs
            .iter()
            .find(|o| o.len() == NUM_ANCHORS * NUM_COORDS)
            .ok_or_else(|| anyhow!("No regressor output of {} values", NUM_ANCHORS * NUM_COORDS))?;
        let scores = outputs
            .iter()
            .find(|o| o.len() == NUM_ANCHORS)
            .ok_or_else(|| anyhow!("No score output of {} values", NUM_ANCHORS))?;

        Ok(select(
            decode(scores, boxes, &self.anchors, self.score_threshold),
            self.max_faces,
        ))
    }
}

impl KeypointDetector for BlazeFaceDetector {
    fn detect(&self, image: &RgbImage) -> crate::error::Result<Vec<DetectedFace>> {
        let detections = self.detect_normalized(image).map_err(DetectError::detection)?;
        Ok(detections
            .iter()
            .map(|det| to_pixel_face(det, image.width(), image.height()))
            .collect())
    }
}

/// Anchor centers for the 16x16 (2 per cell) and 8x8 (6 per cell) feature maps.
fn generate_anchors() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    for (grid, per_cell) in [(16u8, 2), (8u8, 6)] {
        for y in 0..grid {
            for x in 0..grid {
                let cx = (f32::from(x) + 0.5) / f32::from(grid);
                let cy = (f32::from(y) + 0.5) / f32::from(grid);
                for _ in 0..per_cell {
                    anchors.push([cx, cy]);
                }
            }
        }
    }

    anchors
}

/// Decode raw network output into normalized detections above `threshold`.
fn decode(scores: &[f32], boxes: &[f32], anchors: &[[f32; 2]], threshold: f32) -> Vec<BlazeDetection> {
    let scale = INPUT_SIZE as f32;
    let mut detections = Vec::new();

    for (i, anchor) in anchors.iter().enumerate() {
        let score = sigmoid(scores[i]);
        if score < threshold {
            continue;
        }

        let raw = &boxes[i * NUM_COORDS..(i + 1) * NUM_COORDS];

        // Center format -> corner format
        let cx = anchor[0] + raw[0] / scale;
        let cy = anchor[1] + raw[1] / scale;
        let w = raw[2] / scale;
        let h = raw[3] / scale;

        let mut keypoints = [[0.0f32; 2]; 6];
        for (k, keypoint) in keypoints.iter_mut().enumerate() {
            let kx = anchor[0] + raw[4 + k * 2] / scale;
            let ky = anchor[1] + raw[4 + k * 2 + 1] / scale;
            *keypoint = [kx.clamp(0.0, 1.0), ky.clamp(0.0, 1.0)];
        }

        detections.push(BlazeDetection {
            bbox: [
                (cx - w / 2.0).clamp(0.0, 1.0),
                (cy - h / 2.0).clamp(0.0, 1.0),
                (cx + w / 2.0).clamp(0.0, 1.0),
                (cy + h / 2.0).clamp(0.0, 1.0),
            ],
            score,
            keypoints,
        });
    }

    detections
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut detections: Vec<BlazeDetection>) -> Vec<BlazeDetection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<BlazeDetection> = Vec::new();
    for det in detections {
        if keep.iter().all(|kept| iou(&kept.bbox, &det.bbox) <= NMS_THRESHOLD) {
            keep.push(det);
        }
    }
    keep
}

/// Suppress overlaps and keep at most `max_faces` of the best detections.
fn select(detections: Vec<BlazeDetection>, max_faces: Option<usize>) -> Vec<BlazeDetection> {
    let mut kept = nms(detections);
    if let Some(max_faces) = max_faces {
        kept.truncate(max_faces);
    }
    kept
}

fn to_pixel_face(det: &BlazeDetection, width: u32, height: u32) -> DetectedFace {
    let (w, h) = (width as f32, height as f32);
    let x1 = (det.bbox[0] * w) as i32;
    let y1 = (det.bbox[1] * h) as i32;
    let x2 = (det.bbox[2] * w) as i32;
    let y2 = (det.bbox[3] * h) as i32;

    let keypoints: BTreeMap<String, [i32; 2]> = KEYPOINT_NAMES
        .iter()
        .zip(det.keypoints.iter())
        .map(|(name, [x, y])| (name.to_string(), [(x * w) as i32, (y * h) as i32]))
        .collect();

    DetectedFace {
        bbox: BoundingBox {
            x: x1,
            y: y1,
            width: (x2 - x1).max(1),
            height: (y2 - y1).max(1),
        },
        confidence: det.score,
        keypoints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_outputs() -> (Vec<f32>, Vec<f32>) {
        (vec![-10.0; NUM_ANCHORS], vec![0.0; NUM_ANCHORS * NUM_COORDS])
    }

    #[test]
    fn test_anchor_layout() {
        let anchors = generate_anchors();
        assert_eq!(anchors.len(), NUM_ANCHORS);
        assert_eq!(anchors[0], [0.5 / 16.0, 0.5 / 16.0]);
        assert_eq!(anchors[1], anchors[0]);
        assert_eq!(anchors[512], [0.5 / 8.0, 0.5 / 8.0]);
        assert_eq!(anchors[NUM_ANCHORS - 1], [7.5 / 8.0, 7.5 / 8.0]);
    }

    #[test]
    fn test_decode_single_face() {
        let anchors = generate_anchors();
        let (mut scores, mut boxes) = raw_outputs();

        // Anchor 512 is centered at (0.0625, 0.0625); shift it to (0.5, 0.5)
        let i = 512;
        scores[i] = 5.0;
        let shift = (0.5 - 0.0625) * INPUT_SIZE as f32;
        boxes[i * NUM_COORDS] = shift;
        boxes[i * NUM_COORDS + 1] = shift;
        boxes[i * NUM_COORDS + 2] = 32.0;
        boxes[i * NUM_COORDS + 3] = 32.0;
        // Left eye keypoint (index 1)
        boxes[i * NUM_COORDS + 6] = shift + 8.0;
        boxes[i * NUM_COORDS + 7] = shift;

        let detections = decode(&scores, &boxes, &anchors, DEFAULT_SCORE_THRESHOLD);
        assert_eq!(detections.len(), 1);

        let det = &detections[0];
        assert!((det.bbox[0] - 0.375).abs() < 1e-5);
        assert!((det.bbox[2] - 0.625).abs() < 1e-5);
        assert!((det.keypoints[1][0] - 0.5625).abs() < 1e-5);
        assert!((det.keypoints[1][1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_decode_respects_threshold() {
        let anchors = generate_anchors();
        let (mut scores, boxes) = raw_outputs();
        scores[3] = 0.0; // sigmoid = 0.5

        assert!(decode(&scores, &boxes, &anchors, 0.75).is_empty());
        assert_eq!(decode(&scores, &boxes, &anchors, 0.5).len(), 1);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let make = |bbox: [f32; 4], score: f32| BlazeDetection {
            bbox,
            score,
            keypoints: [[0.0; 2]; 6],
        };
        let kept = nms(vec![
            make([0.1, 0.1, 0.4, 0.4], 0.8),
            make([0.11, 0.1, 0.41, 0.4], 0.9),
            make([0.6, 0.6, 0.9, 0.9], 0.7),
        ]);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn test_select_caps_face_count() {
        // Seven disjoint boxes along the diagonal
        let detections: Vec<_> = (0..7)
            .map(|i| {
                let offset = i as f32 * 0.14;
                BlazeDetection {
                    bbox: [offset, offset, offset + 0.1, offset + 0.1],
                    score: 0.5 + i as f32 * 0.05,
                    keypoints: [[0.0; 2]; 6],
                }
            })
            .collect();

        let capped = select(detections.clone(), Some(5));
        assert_eq!(capped.len(), 5);
        assert!(capped.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(capped[0].score, detections[6].score);

        assert_eq!(select(detections, None).len(), 7);
    }

    #[test]
    fn test_pixel_face_conversion() {
        let mut keypoints = [[0.0; 2]; 6];
        keypoints[0] = [0.25, 0.5];
        keypoints[1] = [0.75, 0.5];
        let det = BlazeDetection {
            bbox: [0.125, 0.25, 0.875, 0.75],
            score: 0.95,
            keypoints,
        };

        let face = to_pixel_face(&det, 200, 100);
        assert_eq!(face.bbox, BoundingBox { x: 25, y: 25, width: 150, height: 50 });
        assert_eq!(face.keypoints["right_eye"], [50, 50]);
        assert_eq!(face.keypoints["left_eye"], [150, 50]);
        assert_eq!(face.keypoints.len(), 6);
    }
}
