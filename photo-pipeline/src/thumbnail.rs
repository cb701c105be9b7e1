use crate::compress::PipelineError;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;

/// Creates the WebP display copy of an already decoded image.
///
/// The image is only shrunk, never enlarged.
pub fn create_thumbnail(img: &DynamicImage, size: u32) -> Result<Vec<u8>, PipelineError> {
    let thumb = if size > 0 && (img.width() > size || img.height() > size) {
        img.resize(size, size, FilterType::Lanczos3)
    } else {
        img.clone()
    };

    // The WebP encoder only takes 8-bit RGB(A)
    let thumb = DynamicImage::ImageRgba8(thumb.to_rgba8());

    let mut buffer = Cursor::new(Vec::new());
    thumb
        .write_to(&mut buffer, ImageFormat::WebP)
        .map_err(|e| PipelineError::Encode(format!("Failed to write thumbnail: {}", e)))?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_thumbnail_shrinks_to_bound() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 150, Rgb([10, 200, 30])));
        let bytes = create_thumbnail(&img, 100).unwrap();

        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::WebP).unwrap();
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
    }
}
