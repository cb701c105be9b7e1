//! # Photo Pipeline
//!
//! Turns raw camera captures or selected image files into upload-ready blobs.
//!
//! This crate provides the media half of field photo capture:
//! - Input acceptance (MIME type / file extension filter)
//! - Decoding to obtain natural pixel dimensions
//! - Downscaling to a bounded maximum dimension and JPEG re-encoding
//! - A small WebP display copy for on-device galleries
//!
//! ## Platform Separation
//!
//! This crate knows nothing about surveys, queues or storage. Registering the
//! result in a draft and an upload queue is the job of the application crate.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use photo_pipeline::{process_image, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let processed = process_image(&raw_bytes, &config)?;
//! println!("{}x{} -> {} bytes", processed.width, processed.height, processed.blob.len());
//! ```

pub mod compress;
pub mod mime;
pub mod models;
pub mod thumbnail;

pub use compress::{
    calculate_resize_dimensions, process_image, process_image_blocking, PipelineError,
};
pub use mime::{accepts, guess_mime_from_ext};
pub use models::{PipelineConfig, ProcessedPhoto};
pub use thumbnail::create_thumbnail;
