/// Remote layout of synchronized field data
///
/// Directory structure:
/// ```text
/// FieldSurveys/
/// └── sync/
///     ├── photos/           # compressed uploads
///     │   └── <survey-id>/
///     │       ├── <photo-id>.jpg
///     │       └── <photo-id>.toml   # caption, location, geo
///     └── surveys/          # submitted surveys
///         └── <survey-id>.json
/// ```

/// Base sync directory under remote_path
pub const SYNC_BASE: &str = "sync";

/// Photos directory
pub const PHOTOS_DIR: &str = "sync/photos";

/// Submitted surveys directory
pub const SURVEYS_DIR: &str = "sync/surveys";

/// Build the photo directory of a survey
pub fn survey_photos_path(survey_id: &str) -> String {
    format!("{}/{}", PHOTOS_DIR, survey_id)
}

/// Build the path of an uploaded photo
pub fn photo_path(survey_id: &str, photo_id: &str) -> String {
    format!("{}/{}/{}.jpg", PHOTOS_DIR, survey_id, photo_id)
}

/// Build the path of a photo's metadata sidecar
pub fn photo_meta_path(survey_id: &str, photo_id: &str) -> String {
    format!("{}/{}/{}.toml", PHOTOS_DIR, survey_id, photo_id)
}

/// Build the path of a submitted survey
pub fn survey_path(survey_id: &str) -> String {
    format!("{}/{}.json", SURVEYS_DIR, survey_id)
}

/// Prefix `path` with the configured remote folder
pub fn under_remote(remote_path: &str, path: &str) -> String {
    let base = remote_path.trim_matches('/');
    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}
