//! Request handling independent of the HTTP layer.
//!
//! Each handler takes an [`Upload`], an injected detector and the
//! [`UploadStore`](crate::storage::UploadStore), and returns a serializable
//! report or a [`DetectError`](crate::error::DetectError).

pub mod keypoint;
pub mod mesh;

use image::{DynamicImage, ImageDecoder, ImageError, ImageReader, RgbImage};
use std::io::Cursor;

use crate::error::Result;

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Decode any supported image format into an RGB buffer, pixels as stored.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Decode into an RGB buffer turned upright according to the EXIF orientation tag.
pub fn decode_oriented_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?
        .into_decoder()?;
    let orientation = decoder.orientation()?;

    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image.to_rgb8())
}
