//! Screenshot payloads captured from the page surface.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

/// Screenshot errors.
#[derive(Error, Debug)]
pub enum ScreenshotError {
    #[error("Screenshot data is empty")]
    Empty,
    #[error("Failed to read image: {0}")]
    ImageReadFailed(String),
}

/// Represents a captured screenshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub base64_data: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl Screenshot {
    /// Create a new screenshot.
    pub fn new(base64_data: String, mime_type: &'static str, width: u32, height: u32) -> Self {
        Self {
            base64_data,
            mime_type,
            width,
            height,
        }
    }

    /// Build a screenshot from encoded image bytes (PNG, JPEG, ...).
    ///
    /// The format and dimensions are read from the data itself.
    pub fn from_encoded(data: &[u8]) -> Result<Self, ScreenshotError> {
        if data.is_empty() {
            return Err(ScreenshotError::Empty);
        }

        let format =
            image::guess_format(data).map_err(|e| ScreenshotError::ImageReadFailed(e.to_string()))?;
        let img = image::load_from_memory_with_format(data, format)
            .map_err(|e| ScreenshotError::ImageReadFailed(e.to_string()))?;

        Ok(Self::new(
            STANDARD.encode(data),
            format.to_mime_type(),
            img.width(),
            img.height(),
        ))
    }

    /// `data:` URL form used by OpenAI-compatible endpoints.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| {
            image::Rgb([0u8, 0u8, 0u8])
        }));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_from_encoded_png() {
        let screenshot = Screenshot::from_encoded(&encoded(32, 18, ImageFormat::Png)).unwrap();
        assert_eq!(screenshot.width, 32);
        assert_eq!(screenshot.height, 18);
        assert_eq!(screenshot.mime_type, "image/png");
        assert!(screenshot.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_from_encoded_jpeg() {
        let screenshot = Screenshot::from_encoded(&encoded(16, 16, ImageFormat::Jpeg)).unwrap();
        assert_eq!(screenshot.mime_type, "image/jpeg");
        assert_eq!((screenshot.width, screenshot.height), (16, 16));
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        assert!(matches!(
            Screenshot::from_encoded(&[]),
            Err(ScreenshotError::Empty)
        ));
        assert!(Screenshot::from_encoded(b"definitely not an image").is_err());
    }
}
