use serde::Serialize;
use thiserror::Error;

/// Generic message attached to every non-policy failure body.
pub const GENERIC_FAILURE_MESSAGE: &str = "An error occurred while processing the image.";

/// Failure category reported to callers alongside the error text.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Decode,
    Detection,
    Arithmetic,
    Policy,
    Storage,
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("No file uploaded.")]
    MissingUpload,

    #[error("failed to read upload: {0}")]
    Upload(String),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("face detection failed: {0}")]
    Detection(String),

    #[error("landmark {index} is missing; detector returned {available} landmarks")]
    MissingLandmark { index: usize, available: usize },

    #[error("reference keypoints coincide; pixel distance is zero")]
    CoincidentKeypoints,

    #[error("Too many faces detected. Maximum allowed is {max}.")]
    TooManyFaces { face_count: usize, max: usize },

    #[error("failed to store image: {0}")]
    Storage(#[from] std::io::Error),

    #[error("failed to encode annotated image: {0}")]
    Encode(String),
}

impl DetectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingUpload | Self::Upload(_) | Self::Decode(_) => ErrorKind::Decode,
            Self::Detection(_) | Self::MissingLandmark { .. } => ErrorKind::Detection,
            Self::CoincidentKeypoints => ErrorKind::Arithmetic,
            Self::TooManyFaces { .. } => ErrorKind::Policy,
            Self::Storage(_) | Self::Encode(_) => ErrorKind::Storage,
        }
    }

    /// Wrap a backend error into the detection category.
    pub fn detection(err: impl std::fmt::Display) -> Self {
        Self::Detection(err.to_string())
    }

    /// Body returned to the caller, always with a 200 status.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            Self::TooManyFaces { face_count, .. } => ErrorBody {
                error: self.to_string(),
                message: None,
                face_count: Some(*face_count),
                kind: self.kind(),
            },
            Self::MissingUpload => ErrorBody {
                error: self.to_string(),
                message: Some("Please provide an image.".to_string()),
                face_count: None,
                kind: self.kind(),
            },
            _ => ErrorBody {
                error: self.to_string(),
                message: Some(GENERIC_FAILURE_MESSAGE.to_string()),
                face_count: None,
                kind: self.kind(),
            },
        }
    }
}

/// Serialized failure payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_count: Option<usize>,
    pub kind: ErrorKind,
}

pub type Result<T> = std::result::Result<T, DetectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_body_has_no_message() {
        let err = DetectError::TooManyFaces { face_count: 2, max: 2 };
        let body = serde_json::to_value(err.to_body()).unwrap();

        assert_eq!(body["error"], "Too many faces detected. Maximum allowed is 2.");
        assert_eq!(body["face_count"], 2);
        assert_eq!(body["kind"], "policy");
        assert!(body.get("message").is_none());
    }

    #[test]
    fn test_failure_body_carries_generic_message() {
        let body = serde_json::to_value(DetectError::CoincidentKeypoints.to_body()).unwrap();

        assert_eq!(body["message"], GENERIC_FAILURE_MESSAGE);
        assert_eq!(body["kind"], "arithmetic");
        assert!(body.get("face_count").is_none());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(DetectError::MissingUpload.kind(), ErrorKind::Decode);
        assert_eq!(DetectError::detection("boom").kind(), ErrorKind::Detection);
        assert_eq!(
            DetectError::MissingLandmark { index: 454, available: 10 }.kind(),
            ErrorKind::Detection
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(DetectError::from(io).kind(), ErrorKind::Storage);
    }
}
