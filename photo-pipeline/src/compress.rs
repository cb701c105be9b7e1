use crate::models::{PipelineConfig, ProcessedPhoto};
use crate::thumbnail::create_thumbnail;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;

/// Error type for photo processing
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Input is not an image at all
    UnsupportedInput(String),
    /// Bytes could not be decoded into pixels
    Decode(String),
    /// Re-encoding into the upload format failed
    Encode(String),
    /// The blocking worker could not run to completion
    Processing(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::UnsupportedInput(msg) => write!(f, "Unsupported input: {}", msg),
            PipelineError::Decode(msg) => write!(f, "Image decode error: {}", msg),
            PipelineError::Encode(msg) => write!(f, "Image encode error: {}", msg),
            PipelineError::Processing(msg) => write!(f, "Processing error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Resize an image maintaining aspect ratio
pub fn calculate_resize_dimensions(
    original_width: u32,
    original_height: u32,
    max_width: u32,
    max_height: u32,
) -> (u32, u32) {
    if max_width == 0 || max_height == 0 {
        return (original_width, original_height);
    }

    let ratio =
        (original_width as f32 / max_width as f32).max(original_height as f32 / max_height as f32);

    if ratio > 1.0 {
        let new_width = ((original_width as f32 / ratio) as u32).max(1);
        let new_height = ((original_height as f32 / ratio) as u32).max(1);
        (new_width, new_height)
    } else {
        (original_width, original_height)
    }
}

/// Decodes, downscales and re-encodes a captured image.
///
/// Images already within `max_dimension` are re-encoded at their natural size,
/// never upscaled.
pub fn process_image(bytes: &[u8], config: &PipelineConfig) -> Result<ProcessedPhoto, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::UnsupportedInput("empty input".to_string()));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::Decode(format!("Failed to load image: {}", e)))?;

    let (original_width, original_height) = (img.width(), img.height());
    log::debug!(
        "Decoded capture: {}x{} ({} bytes)",
        original_width,
        original_height,
        bytes.len()
    );

    let (width, height) = calculate_resize_dimensions(
        original_width,
        original_height,
        config.max_dimension,
        config.max_dimension,
    );

    let resized = if (width, height) != (original_width, original_height) {
        img.resize_exact(width, height, FilterType::Lanczos3)
    } else {
        img
    };

    let blob = encode_jpeg(&resized, config.jpeg_quality)?;
    let thumbnail = create_thumbnail(&resized, config.thumbnail_size)?;

    log::debug!(
        "Compressed capture to {}x{}: {} bytes (thumbnail {} bytes)",
        width,
        height,
        blob.len(),
        thumbnail.len()
    );

    Ok(ProcessedPhoto {
        blob,
        thumbnail,
        original_width,
        original_height,
        width,
        height,
    })
}

/// Runs [`process_image`] on the blocking pool so the event loop stays free
pub async fn process_image_blocking(
    bytes: Vec<u8>,
    config: PipelineConfig,
) -> Result<ProcessedPhoto, PipelineError> {
    tokio::task::spawn_blocking(move || process_image(&bytes, &config))
        .await
        .map_err(|e| PipelineError::Processing(format!("Task join error: {}", e)))?
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let rgb = img.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode_image(&rgb)
        .map_err(|e| PipelineError::Encode(format!("Failed to write JPEG: {}", e)))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_resize_dimensions() {
        // Image larger than max
        let (w, h) = calculate_resize_dimensions(2000, 1500, 1024, 1024);
        assert_eq!((w, h), (1024, 768));

        // Image smaller than max
        let (w, h) = calculate_resize_dimensions(800, 600, 1024, 1024);
        assert_eq!((w, h), (800, 600));

        // Unbounded
        let (w, h) = calculate_resize_dimensions(800, 600, 0, 0);
        assert_eq!((w, h), (800, 600));
    }

    #[test]
    fn test_process_downscales_large_capture() {
        let config = PipelineConfig {
            max_dimension: 200,
            jpeg_quality: 70,
            thumbnail_size: 64,
        };
        let processed = process_image(&jpeg_fixture(800, 400), &config).unwrap();

        assert_eq!((processed.original_width, processed.original_height), (800, 400));
        assert_eq!((processed.width, processed.height), (200, 100));

        let decoded = image::load_from_memory(&processed.blob).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));

        let thumb = image::load_from_memory(&processed.thumbnail).unwrap();
        assert!(thumb.width() <= 64 && thumb.height() <= 64);
    }

    #[test]
    fn test_process_keeps_small_capture_size() {
        let config = PipelineConfig::default();
        let processed = process_image(&jpeg_fixture(120, 90), &config).unwrap();
        assert_eq!((processed.width, processed.height), (120, 90));
    }

    #[test]
    fn test_process_rejects_garbage() {
        let err = process_image(b"definitely not a jpeg", &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));

        let err = process_image(&[], &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedInput(_)));
    }

    #[tokio::test]
    async fn test_process_on_blocking_pool() {
        let config = PipelineConfig {
            max_dimension: 50,
            ..PipelineConfig::default()
        };
        let processed = process_image_blocking(jpeg_fixture(100, 100), config)
            .await
            .unwrap();
        assert_eq!((processed.width, processed.height), (50, 50));
    }
}
