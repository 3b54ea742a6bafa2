//! HTTP surface: two detection routes and two liveness routes.
//!
//! Every response has status 200; failures are reported in the body.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{DetectError, ErrorKind, Result};
use crate::faces::{KeypointDetector, LandmarkDetector};
use crate::handlers::{keypoint, mesh, Upload};
use crate::storage::UploadStore;

/// Multipart field carrying the image.
const UPLOAD_FIELD: &str = "file";

/// Shared per-process state. Detectors are built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub keypoint: Arc<dyn KeypointDetector>,
    pub landmark: Arc<dyn LandmarkDetector>,
    pub store: Arc<UploadStore>,
}

impl AppState {
    pub fn new(
        keypoint: Arc<dyn KeypointDetector>,
        landmark: Arc<dyn LandmarkDetector>,
        store: UploadStore,
    ) -> Self {
        Self {
            keypoint,
            landmark,
            store: Arc::new(store),
        }
    }
}

#[derive(Serialize)]
struct Hello {
    data: &'static str,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/mtcnn/detect-face/", post(keypoint_detect_face))
        .route("/mtcnn/hello-world/", get(keypoint_hello))
        .route("/mediapipe/detect-face/", post(mesh_detect_face))
        .route("/mediapipe/mediapipe-test/", get(mesh_hello))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn keypoint_detect_face(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let result = match read_upload(multipart).await {
        Ok(upload) => {
            let detector = Arc::clone(&state.keypoint);
            let store = Arc::clone(&state.store);
            run_blocking(move || keypoint::detect_face(detector.as_ref(), &store, &upload)).await
        }
        Err(e) => Err(e),
    };
    respond(result)
}

async fn mesh_detect_face(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let result = match read_upload(multipart).await {
        Ok(upload) => {
            let detector = Arc::clone(&state.landmark);
            let store = Arc::clone(&state.store);
            run_blocking(move || mesh::detect_face(detector.as_ref(), &store, &upload)).await
        }
        Err(e) => Err(e),
    };
    respond(result)
}

async fn keypoint_hello() -> Json<Hello> {
    Json(Hello {
        data: "testing the router is working",
    })
}

async fn mesh_hello() -> Json<Hello> {
    Json(Hello {
        data: "Testing mediapipe router operational.",
    })
}

/// Pull the `file` field out of a multipart body.
async fn read_upload(multipart: std::result::Result<Multipart, MultipartRejection>) -> Result<Upload> {
    let mut multipart = multipart.map_err(|e| DetectError::Upload(e.to_string()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectError::Upload(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DetectError::Upload(e.to_string()))?;
        return Ok(Upload::new(filename, bytes.to_vec()));
    }

    Err(DetectError::MissingUpload)
}

/// Run inference and file I/O off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(DetectError::detection)?
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            match err.kind() {
                ErrorKind::Policy => info!(error = %err, "Request rejected"),
                kind => warn!(error = %err, ?kind, "Request failed"),
            }
            Json(err.to_body()).into_response()
        }
    }
}
