use serde::Serialize;
use tracing::{debug, info};

use super::{decode_oriented_rgb, Upload};
use crate::annotate::{draw_label, draw_rect, BLACK, GREEN, RED};
use crate::error::{DetectError, Result};
use crate::faces::{FaceMesh, LandmarkDetector};
use crate::metrics::distance::{distance_from_pixels, FACE_FOCAL_LENGTH_PX, KNOWN_FACE_WIDTH_CM};
use crate::metrics::{assess, pixel_distance, round2, Point, Rect};
use crate::storage::{timestamp, UploadStore};

/// Mesh index of the left cheekbone.
pub const LEFT_CHEEK: usize = 234;
/// Mesh index of the right cheekbone.
pub const RIGHT_CHEEK: usize = 454;

/// Vertical offset of the distance label above the face midpoint.
const LABEL_OFFSET_PX: i64 = 10;

/// Per-face measurement.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FaceReport {
    pub distance_cm: f64,
    pub mid_point: Point,
    pub pixel_distance: f64,
    pub is_centered: bool,
    pub is_too_far: bool,
    pub face_bounds: Rect,
    /// `[height, width, channels]`
    pub img_shape: [u32; 3],
    /// Distance before rounding, used for the image label.
    #[serde(skip)]
    pub exact_distance_cm: f64,
    #[serde(skip)]
    pub landmarks: Vec<Point>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MeshReport {
    pub face_count: usize,
    pub faces: Vec<FaceReport>,
    pub annotated_image_path: String,
}

/// Measure one face from its cheekbone landmarks in a `width` x `height` frame.
pub fn measure_face(mesh: &FaceMesh, width: u32, height: u32) -> Result<FaceReport> {
    let landmarks: Vec<Point> = mesh
        .landmarks
        .iter()
        .map(|lm| Point::from_normalized(lm.x, lm.y, width, height))
        .collect();

    let cheek = |index: usize| {
        landmarks.get(index).copied().ok_or(DetectError::MissingLandmark {
            index,
            available: landmarks.len(),
        })
    };
    let left = cheek(LEFT_CHEEK)?;
    let right = cheek(RIGHT_CHEEK)?;

    let span = pixel_distance(left.as_f64(), right.as_f64());
    let distance = distance_from_pixels(span, FACE_FOCAL_LENGTH_PX, KNOWN_FACE_WIDTH_CM)?;
    let mid_point = Point::midpoint(left, right);
    let framing = assess(mid_point, span, width, height);

    Ok(FaceReport {
        distance_cm: round2(distance),
        mid_point,
        pixel_distance: round2(span),
        is_centered: framing.is_centered,
        is_too_far: framing.is_too_far,
        face_bounds: framing.bounds,
        img_shape: [height, width, 3],
        exact_distance_cm: distance,
        landmarks,
    })
}

/// Store the upload, measure every detected face and write an annotated copy.
pub fn detect_face(detector: &dyn LandmarkDetector, store: &UploadStore, upload: &Upload) -> Result<MeshReport> {
    let stamp = timestamp();
    let saved = store.save_upload(&store.mesh_input_dir(), &stamp, &upload.filename, &upload.bytes)?;
    debug!(path = ?saved.path, "Upload stored");

    let image = decode_oriented_rgb(&upload.bytes)?;
    let (width, height) = image.dimensions();

    let mut canvas = image.clone();
    draw_rect(&mut canvas, Rect::center_region(width, height), BLACK);

    let meshes = detector.detect(&image)?;
    let mut faces = Vec::with_capacity(meshes.len());
    for mesh in &meshes {
        let face = measure_face(mesh, width, height)?;
        draw_label(
            &mut canvas,
            &format!("{:.1} cm", face.exact_distance_cm),
            Point::new(face.mid_point.x, face.mid_point.y - LABEL_OFFSET_PX),
            RED,
        );
        draw_rect(&mut canvas, face.face_bounds, GREEN);
        faces.push(face);
    }

    let output_path = store.annotated_path(&saved.stamp, &upload.filename);
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    canvas
        .save(&output_path)
        .map_err(|e| DetectError::Encode(e.to_string()))?;

    info!(
        face_count = faces.len(),
        width,
        height,
        output = ?output_path,
        "Face mesh detection finished"
    );

    Ok(MeshReport {
        face_count: faces.len(),
        faces,
        annotated_image_path: output_path.to_string_lossy().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetentionConfig, StorageConfig};
    use crate::error::ErrorKind;
    use crate::faces::Landmark;
    use crate::handlers::testing::{jpeg_with_orientation, mesh_with_cheeks, png_bytes, StubMesh};
    use image::Rgb;
    use tempfile::tempdir;

    fn store(root: &std::path::Path) -> UploadStore {
        UploadStore::new(
            StorageConfig {
                root: root.to_path_buf(),
            },
            RetentionConfig::default(),
        )
    }

    #[test]
    fn test_centered_face() {
        // Cheeks at x=120 and x=180 on a 300x300 frame
        let mesh = mesh_with_cheeks((0.4, 0.5), (0.6, 0.5));
        let face = measure_face(&mesh, 300, 300).unwrap();

        assert_eq!(face.mid_point, Point::new(150, 150));
        assert_eq!(face.pixel_distance, 60.0);
        assert_eq!(face.distance_cm, 160.0);
        assert!(face.is_centered);
        assert!(!face.is_too_far);
        assert_eq!(face.face_bounds, Rect { x1: 105, y1: 92, x2: 195, y2: 208 });
        assert_eq!(face.img_shape, [300, 300, 3]);
        assert_eq!(face.landmarks.len(), 478);
    }

    #[test]
    fn test_corner_face_too_far() {
        // Cheeks 15 px apart near the top-left corner
        let mesh = mesh_with_cheeks((0.0, 0.0), (0.05, 0.0));
        let face = measure_face(&mesh, 300, 300).unwrap();

        assert_eq!(face.pixel_distance, 15.0);
        assert!(face.is_too_far);
        assert!(!face.is_centered);
        assert_eq!(face.face_bounds.x1, 0);
        assert_eq!(face.face_bounds.y1, 0);
    }

    #[test]
    fn test_short_mesh_is_detection_error() {
        let mesh = FaceMesh {
            landmarks: vec![Landmark { x: 0.5, y: 0.5, z: 0.0 }; 100],
            presence: 1.0,
        };
        let err = measure_face(&mesh, 300, 300).unwrap_err();
        assert!(matches!(err, DetectError::MissingLandmark { index: 234, available: 100 }));
        assert_eq!(err.kind(), ErrorKind::Detection);
    }

    #[test]
    fn test_coincident_cheeks() {
        let mesh = mesh_with_cheeks((0.5, 0.5), (0.5, 0.5));
        let err = measure_face(&mesh, 300, 300).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
    }

    #[test]
    fn test_detect_face_writes_annotated_image() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let detector = StubMesh(vec![mesh_with_cheeks((0.4, 0.5), (0.6, 0.5))]);

        let report = detect_face(&detector, &store, &Upload::new("face.png", png_bytes(300, 300))).unwrap();
        assert_eq!(report.face_count, 1);
        assert_eq!(report.faces.len(), 1);

        let annotated = image::open(&report.annotated_image_path).unwrap().to_rgb8();
        assert_eq!(annotated.dimensions(), (300, 300));
        // Center region outline
        assert_eq!(*annotated.get_pixel(100, 120), Rgb([0, 0, 0]));
        // Face box outline
        assert_eq!(*annotated.get_pixel(105, 150), Rgb([0, 255, 0]));
        assert!(annotated.pixels().any(|p| *p == Rgb([255, 0, 0])));

        let inputs: Vec<_> = std::fs::read_dir(store.mesh_input_dir()).unwrap().collect();
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn test_rotated_phone_photo_measured_upright() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let detector = StubMesh(vec![mesh_with_cheeks((0.4, 0.5), (0.6, 0.5))]);

        // Stored 300x200, displayed 200x300
        let upload = Upload::new("phone.jpg", jpeg_with_orientation(300, 200, 6));
        let report = detect_face(&detector, &store, &upload).unwrap();

        let face = &report.faces[0];
        assert_eq!(face.img_shape, [300, 200, 3]);
        assert_eq!(face.mid_point, Point::new(100, 150));
        assert_eq!(face.pixel_distance, 40.0);

        let annotated = image::open(&report.annotated_image_path).unwrap();
        assert_eq!((annotated.width(), annotated.height()), (200, 300));
    }

    #[test]
    fn test_same_second_requests_keep_separate_outputs() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let detector = StubMesh(Vec::new());
        let upload = Upload::new("face.png", png_bytes(30, 30));

        let paths: std::collections::HashSet<_> = (0..3)
            .map(|_| detect_face(&detector, &store, &upload).unwrap().annotated_image_path)
            .collect();
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_no_faces_still_annotated() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let report = detect_face(&StubMesh(Vec::new()), &store, &Upload::new("empty.png", png_bytes(90, 60))).unwrap();
        assert_eq!(report.face_count, 0);
        assert!(report.faces.is_empty());
        assert!(std::path::Path::new(&report.annotated_image_path).exists());
    }

    #[test]
    fn test_landmarks_not_serialized() {
        let face = measure_face(&mesh_with_cheeks((0.4, 0.5), (0.6, 0.5)), 300, 300).unwrap();
        let value = serde_json::to_value(&face).unwrap();

        assert!(value.get("landmarks").is_none());
        assert!(value.get("exact_distance_cm").is_none());
        assert_eq!(value["mid_point"]["x"], 150);
        assert_eq!(value["face_bounds"]["x2"], 195);
        assert_eq!(value["img_shape"], serde_json::json!([300, 300, 3]));
    }

    #[test]
    fn test_repeated_requests_identical_metrics() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let detector = StubMesh(vec![mesh_with_cheeks((0.31, 0.42), (0.58, 0.47))]);
        let upload = Upload::new("face.png", png_bytes(300, 200));

        let first = detect_face(&detector, &store, &upload).unwrap();
        let second = detect_face(&detector, &store, &upload).unwrap();
        assert_eq!(first.faces, second.faces);
        assert_eq!(first.face_count, second.face_count);
    }

    #[test]
    fn test_detect_face_rejects_garbage() {
        let dir = tempdir().unwrap();
        let err = detect_face(&StubMesh(Vec::new()), &store(dir.path()), &Upload::new("x.png", vec![1, 2, 3])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
