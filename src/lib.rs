//! # fieldsync
//!
//! Offline-first capture and synchronization engine for multi-step field
//! surveys with photos.
//!
//! - [`services::SurveyDraftStore`] holds one in-progress survey and persists
//!   itself on every change.
//! - [`services::PhotoCapturePipeline`] turns raw images into a registered
//!   photo plus a queued upload.
//! - [`services::PhotoQueue`] tracks uploads with bounded retries.
//! - [`services::SyncOrchestrator`] drains the queue, submits completed
//!   surveys and publishes a [`models::SyncStatusSnapshot`].
//!
//! All persistence goes through a [`storage::KeyValueStore`];
//! [`database::SqliteStore`] is the durable implementation.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod storage;

pub use config::EngineConfig;
pub use error::AppError;
