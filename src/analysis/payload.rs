use std::io::Cursor;
use std::path::PathBuf;

use base64::{engine::general_purpose, Engine};
use image::ImageReader;

use crate::error::AppError;

/// Where the caller's image lives.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

/// Encoded image and its dimensions, derived once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

impl ImagePayload {
    pub fn new(base64: String, width: u32, height: u32) -> Self {
        Self {
            base64,
            width,
            height,
        }
    }

    pub async fn from_source(source: ImageSource) -> Result<Self, AppError> {
        match source {
            ImageSource::Path(path) => {
                let bytes = tokio::fs::read(&path).await?;
                Self::from_bytes(&bytes)
            }
            ImageSource::Bytes(bytes) => Self::from_bytes(&bytes),
        }
    }

    /// Reads the dimensions from the image header; pixels are not decoded.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions()?;
        Ok(Self::new(
            general_purpose::STANDARD.encode(bytes),
            width,
            height,
        ))
    }
}
