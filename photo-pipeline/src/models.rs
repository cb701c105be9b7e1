use serde::{Deserialize, Serialize};

/// Configuration for photo processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Longest edge of the upload blob in pixels
    pub max_dimension: u32,
    /// JPEG quality of the upload blob (1-100)
    pub jpeg_quality: u8,
    /// Longest edge of the WebP display copy in pixels
    pub thumbnail_size: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1600,
            jpeg_quality: 80,
            thumbnail_size: 512,
        }
    }
}

/// Result of processing one captured image
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedPhoto {
    /// Compressed JPEG bytes ready for transport
    pub blob: Vec<u8>,
    /// WebP display copy
    pub thumbnail: Vec<u8>,
    pub original_width: u32,
    pub original_height: u32,
    pub width: u32,
    pub height: u32,
}

impl ProcessedPhoto {
    pub const MIME: &'static str = "image/jpeg";
}
