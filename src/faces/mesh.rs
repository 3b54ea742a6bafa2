use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ort::session::Session;
use std::sync::Mutex;

use super::blazeface::{BlazeDetection, BlazeFaceDetector};
use super::models::{ensure_model, image_tensor, load_session, run_flat};
use super::{sigmoid, FaceMesh, Landmark, LandmarkDetector, MeshOptions};
use crate::config::{ModelsConfig, TensorLayout};
use crate::error::DetectError;

/// Input image size for the face mesh model.
pub const INPUT_SIZE: u32 = 192;

/// Landmarks in the base mesh.
pub const BASE_LANDMARKS: usize = 468;
/// Landmarks with refined iris points.
pub const REFINED_LANDMARKS: usize = 478;

/// The detector box is enlarged by this factor before cropping.
const ROI_SCALE: f32 = 1.5;

/// Two-stage face mesh: BlazeFace finds face regions, the mesh model
/// regresses landmarks inside each region.
pub struct FaceMeshDetector {
    detector: BlazeFaceDetector,
    session: Mutex<Session>,
    layout: TensorLayout,
    options: MeshOptions,
}

impl FaceMeshDetector {
    pub fn new(
        detector: BlazeFaceDetector,
        session: Session,
        layout: TensorLayout,
        options: MeshOptions,
    ) -> Self {
        Self {
            detector: detector
                .with_score_threshold(options.min_detection_confidence)
                .with_max_faces(options.max_num_faces),
            session: Mutex::new(session),
            layout,
            options,
        }
    }

    /// Load both models with the default mesh options.
    pub fn load(models: &ModelsConfig) -> Result<Self> {
        let detector = BlazeFaceDetector::load(models)?;
        let path = ensure_model(models, &models.face_mesh)?;
        let session = load_session(&path)?;
        tracing::info!(model = ?path, "Face mesh model loaded");
        Ok(Self::new(detector, session, models.face_mesh.layout, MeshOptions::default()))
    }

    fn landmarks_for(&self, img: &RgbImage, det: &BlazeDetection) -> Result<Option<FaceMesh>> {
        let roi = Roi::around(det, img.width(), img.height());
        let crop = image::imageops::crop_imm(img, roi.x, roi.y, roi.width, roi.height).to_image();
        let resized = image::imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let input = image_tensor(&resized, self.layout, |v| f32::from(v) / 255.0)?;

        let outputs = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| anyhow!("Failed to lock face mesh model: {}", e))?;
            run_flat(&mut session, input)?
        };

        parse_mesh(&outputs, &roi, img.width(), img.height(), &self.options)
    }
}

/// Turn raw mesh model outputs into a face mesh, or `None` when the presence
/// score is below the detection confidence.
fn parse_mesh(
    outputs: &[Vec<f32>],
    roi: &Roi,
    img_width: u32,
    img_height: u32,
    options: &MeshOptions,
) -> Result<Option<FaceMesh>> {
    let coords = outputs
        .iter()
        .filter(|o| o.len() % 3 == 0 && o.len() >= BASE_LANDMARKS * 3)
        .max_by_key(|o| o.len())
        .ok_or_else(|| anyhow!("No landmark output in face mesh model"))?;
    let presence = outputs
        .iter()
        .find(|o| o.len() == 1)
        .map(|o| sigmoid(o[0]))
        .unwrap_or(1.0);

    if presence < options.min_detection_confidence {
        return Ok(None);
    }

    let count = if options.refine_landmarks {
        (coords.len() / 3).min(REFINED_LANDMARKS)
    } else {
        BASE_LANDMARKS
    };

    let landmarks = coords
        .chunks_exact(3)
        .take(count)
        .map(|c| roi.to_image(c, img_width, img_height))
        .collect();

    Ok(Some(FaceMesh { landmarks, presence }))
}

impl LandmarkDetector for FaceMeshDetector {
    fn detect(&self, image: &RgbImage) -> crate::error::Result<Vec<FaceMesh>> {
        let regions = self
            .detector
            .detect_normalized(image)
            .map_err(DetectError::detection)?;

        let mut meshes = Vec::with_capacity(regions.len());
        for det in &regions {
            if let Some(mesh) = self.landmarks_for(image, det).map_err(DetectError::detection)? {
                meshes.push(mesh);
            }
        }
        Ok(meshes)
    }
}

/// Square crop region around a detection, in pixels, clipped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Roi {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl Roi {
    fn around(det: &BlazeDetection, img_width: u32, img_height: u32) -> Self {
        let (w, h) = (img_width as f32, img_height as f32);
        let cx = (det.bbox[0] + det.bbox[2]) / 2.0 * w;
        let cy = (det.bbox[1] + det.bbox[3]) / 2.0 * h;
        let side = ((det.bbox[2] - det.bbox[0]) * w)
            .max((det.bbox[3] - det.bbox[1]) * h)
            * ROI_SCALE;

        let x1 = (cx - side / 2.0).max(0.0) as u32;
        let y1 = (cy - side / 2.0).max(0.0) as u32;
        let x2 = ((cx + side / 2.0) as u32).min(img_width);
        let y2 = ((cy + side / 2.0) as u32).min(img_height);

        Self {
            x: x1.min(img_width.saturating_sub(1)),
            y: y1.min(img_height.saturating_sub(1)),
            width: x2.saturating_sub(x1).max(1),
            height: y2.saturating_sub(y1).max(1),
        }
    }

    /// Map a model-space `[x, y, z]` triple back to normalized image coordinates.
    fn to_image(&self, c: &[f32], img_width: u32, img_height: u32) -> Landmark {
        let size = INPUT_SIZE as f32;
        Landmark {
            x: (self.x as f32 + c[0] / size * self.width as f32) / img_width as f32,
            y: (self.y as f32 + c[1] / size * self.height as f32) / img_height as f32,
            z: c[2] / size * self.width as f32 / img_width as f32,
        }
    }
}
