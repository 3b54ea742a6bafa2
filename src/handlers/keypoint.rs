use serde::Serialize;
use tracing::{debug, info};

use super::{decode_rgb, Upload};
use crate::error::{DetectError, Result};
use crate::faces::{DetectedFace, KeypointDetector};
use crate::metrics::distance::{calculate_distance, EYE_FOCAL_LENGTH_PX, REAL_EYE_DISTANCE_CM};
use crate::storage::{timestamp, UploadStore};

/// Face count cap. A count equal to the cap is already rejected, so only a
/// single face is ever measured.
pub const MAX_FACES: usize = 2;

/// Successful keypoint measurement.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeypointReport {
    pub face_count: usize,
    pub distances_cm: Vec<f64>,
    /// Detector output, unfiltered.
    pub raw_output: Vec<DetectedFace>,
}

/// Apply the face-count policy and estimate eye-based distances.
///
/// Faces missing either eye keypoint contribute no distance.
pub fn measure_faces(faces: Vec<DetectedFace>) -> Result<KeypointReport> {
    let face_count = faces.len();
    if face_count >= MAX_FACES {
        return Err(DetectError::TooManyFaces {
            face_count,
            max: MAX_FACES,
        });
    }

    let mut distances_cm = Vec::with_capacity(face_count);
    for face in &faces {
        if let (Some(left_eye), Some(right_eye)) = (face.keypoint("left_eye"), face.keypoint("right_eye")) {
            distances_cm.push(calculate_distance(
                left_eye,
                right_eye,
                EYE_FOCAL_LENGTH_PX,
                REAL_EYE_DISTANCE_CM,
            )?);
        }
    }

    Ok(KeypointReport {
        face_count,
        distances_cm,
        raw_output: faces,
    })
}

/// Store the upload, run the keypoint detector and measure the result.
pub fn detect_face(detector: &dyn KeypointDetector, store: &UploadStore, upload: &Upload) -> Result<KeypointReport> {
    let stamp = timestamp();
    let saved = store.save_upload(&store.keypoint_input_dir(), &stamp, &upload.filename, &upload.bytes)?;
    debug!(path = ?saved.path, "Upload stored");

    let image = decode_rgb(&upload.bytes)?;
    let faces = detector.detect(&image)?;
    info!(face_count = faces.len(), width = image.width(), height = image.height(), "Keypoint detection finished");

    measure_faces(faces)
}
