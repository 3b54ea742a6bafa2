//! Face distance and framing estimation over HTTP.
//!
//! Two detection pipelines share the same plumbing:
//! - a keypoint pipeline that estimates distance from the eyes and rejects
//!   multi-face images
//! - a landmark mesh pipeline that estimates distance from the cheekbones,
//!   checks framing and writes an annotated copy of the upload

pub mod annotate;
pub mod config;
pub mod error;
pub mod faces;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod storage;
