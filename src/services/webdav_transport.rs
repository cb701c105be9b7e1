//! `SyncTransport` for a Nextcloud / WebDAV server.

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::models::GeoPoint;
use crate::services::sync_paths;
use crate::services::transport::{
    FailureKind, PhotoUpload, RemoteRef, SurveySubmission, SyncTransport, TransportError,
};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Metadata written next to each uploaded photo
#[derive(Debug, Serialize)]
struct PhotoSidecar {
    photo_id: String,
    survey_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    captured_at: Option<String>,
    // Tables must come last in TOML
    #[serde(skip_serializing_if = "Option::is_none")]
    geo: Option<GeoPoint>,
}

pub struct WebDavTransport {
    http: reqwest::Client,
    dav: reqwest_dav::Client,
    base_url: String,
    config: ServerConfig,
    /// Collections already created this session
    known_dirs: Mutex<HashSet<String>>,
}

impl WebDavTransport {
    pub fn new(config: ServerConfig) -> Result<Self, AppError> {
        let base_url = webdav_base_url(&config);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Network(format!("HTTP client error: {}", e)))?;

        let dav = reqwest_dav::ClientBuilder::new()
            .set_host(base_url.clone())
            .set_auth(reqwest_dav::Auth::Basic(
                config.username.clone(),
                config.app_password.clone(),
            ))
            .build()
            .map_err(|e| AppError::Network(format!("WebDAV client error: {:?}", e)))?;

        Ok(Self {
            http,
            dav,
            base_url,
            config,
            known_dirs: Mutex::new(HashSet::new()),
        })
    }

    fn remote(&self, path: &str) -> String {
        sync_paths::under_remote(&self.config.remote_path, path)
    }

    /// Creates each collection level in turn (WebDAV cannot create nested
    /// collections in one call). Errors are only logged: the collection
    /// usually exists already and the following PUT reports real problems.
    async fn ensure_dirs(&self, dirs: &[String]) {
        let mut levels = vec![self.remote("")];
        levels.extend(dirs.iter().map(|d| self.remote(d)));

        for path in levels {
            let path = path.trim_end_matches('/').to_string();
            if path.is_empty() || self.is_known_dir(&path) {
                continue;
            }
            if let Err(e) = self.dav.mkcol(&path).await {
                log::debug!("MKCOL '{}' note: {:?}", path, e);
            }
            self.known_dirs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(path);
        }
    }

    fn is_known_dir(&self, path: &str) -> bool {
        self.known_dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    async fn put(&self, path: &str, body: Vec<u8>, content_type: &str) -> Result<(), TransportError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .put(&url)
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::transient(format!("PUT {} failed: {}", path, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if matches!(status, StatusCode::NOT_FOUND | StatusCode::CONFLICT) {
            // Parent collection is missing after all; create it again next time
            self.known_dirs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }
        Err(TransportError {
            kind: classify_status(status),
            message: format!("PUT {}: HTTP {}", path, status),
        })
    }
}

impl SyncTransport for WebDavTransport {
    async fn upload_photo(&self, upload: PhotoUpload) -> Result<RemoteRef, TransportError> {
        let survey_id = upload.survey_id.to_string();
        let photo_id = upload.photo_id.to_string();

        self.ensure_dirs(&[
            sync_paths::SYNC_BASE.to_string(),
            sync_paths::PHOTOS_DIR.to_string(),
            sync_paths::survey_photos_path(&survey_id),
        ])
        .await;

        let sidecar = photo_sidecar(&upload)?;
        let photo_path = self.remote(&sync_paths::photo_path(&survey_id, &photo_id));
        let size = upload.bytes.len();
        self.put(&photo_path, upload.bytes, photo_pipeline::ProcessedPhoto::MIME)
            .await?;

        let meta_path = self.remote(&sync_paths::photo_meta_path(&survey_id, &photo_id));
        self.put(&meta_path, sidecar.into_bytes(), "application/toml")
            .await?;

        log::info!("Uploaded photo {} ({} bytes) to {}", photo_id, size, photo_path);
        Ok(photo_path)
    }

    async fn submit_survey(&self, submission: SurveySubmission) -> Result<(), TransportError> {
        let survey_id = submission.survey_id.to_string();

        self.ensure_dirs(&[
            sync_paths::SYNC_BASE.to_string(),
            sync_paths::SURVEYS_DIR.to_string(),
        ])
        .await;

        let body = serde_json::to_vec_pretty(&submission).map_err(|e| {
            TransportError::permanent(format!("Survey {} not serializable: {}", survey_id, e))
        })?;
        let path = self.remote(&sync_paths::survey_path(&survey_id));
        self.put(&path, body, "application/json").await?;

        log::info!(
            "Submitted survey {} with {} photos",
            survey_id,
            submission.photos.len()
        );
        Ok(())
    }
}

/// `<server>/remote.php/dav/files/<user>`
pub fn webdav_base_url(config: &ServerConfig) -> String {
    format!(
        "{}/remote.php/dav/files/{}",
        config.server_url.trim_end_matches('/'),
        config.username
    )
}

/// Timeouts, rate limits and server errors are worth another attempt;
/// any other rejection is final.
pub fn classify_status(status: StatusCode) -> FailureKind {
    match status.as_u16() {
        408 | 425 | 429 => FailureKind::Transient,
        code if (500..600).contains(&code) => FailureKind::Transient,
        code if (400..500).contains(&code) => FailureKind::Permanent,
        _ => FailureKind::Transient,
    }
}

fn photo_sidecar(upload: &PhotoUpload) -> Result<String, TransportError> {
    let sidecar = PhotoSidecar {
        photo_id: upload.photo_id.to_string(),
        survey_id: upload.survey_id.to_string(),
        caption: upload.caption.clone(),
        location: upload.location.clone(),
        captured_at: upload.captured_at.map(|t| t.to_rfc3339()),
        geo: upload.geo,
    };
    toml::to_string(&sidecar)
        .map_err(|e| TransportError::permanent(format!("Photo metadata not serializable: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), FailureKind::Permanent);
        assert_eq!(classify_status(StatusCode::UNSUPPORTED_MEDIA_TYPE), FailureKind::Permanent);
        assert_eq!(classify_status(StatusCode::PAYLOAD_TOO_LARGE), FailureKind::Permanent);
    }

    #[test]
    fn test_webdav_base_url() {
        let config = ServerConfig {
            server_url: "https://cloud.example.org/".to_string(),
            username: "field1".to_string(),
            app_password: "secret".to_string(),
            remote_path: "FieldSurveys".to_string(),
        };
        assert_eq!(
            webdav_base_url(&config),
            "https://cloud.example.org/remote.php/dav/files/field1"
        );
    }

    #[test]
    fn test_photo_sidecar() {
        let upload = PhotoUpload {
            survey_id: Uuid::new_v4(),
            photo_id: Uuid::new_v4(),
            bytes: vec![1, 2, 3],
            caption: Some("Drum storage".to_string()),
            location: None,
            geo: Some(GeoPoint {
                latitude: 1.5,
                longitude: 2.5,
                accuracy_m: None,
            }),
            captured_at: None,
        };
        let toml = photo_sidecar(&upload).unwrap();
        assert!(toml.contains("caption = \"Drum storage\""));
        assert!(!toml.contains("location"));
        assert!(toml.contains("latitude = 1.5"));
        assert!(toml.contains(&upload.photo_id.to_string()));
    }
}
