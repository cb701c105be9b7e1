use std::path::Path;

/// Determines a MIME type from the file extension
pub fn guess_mime_from_ext(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        Some("webp") => Some("image/webp"),
        _ => None,
    }
}

/// Formats the decoder is built with
const DECODABLE: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Input acceptance filter for the capture boundary.
///
/// A declared MIME type wins; the file name extension is only consulted when
/// no MIME type was supplied. Only formats that can be decoded pass.
pub fn accepts(mime: Option<&str>, file_name: Option<&str>) -> bool {
    if let Some(mime) = mime {
        let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        return DECODABLE.contains(&essence.as_str());
    }

    file_name
        .map(|name| guess_mime_from_ext(Path::new(name)).is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_declared_mime() {
        assert!(accepts(Some("image/jpeg"), None));
        assert!(accepts(Some("IMAGE/PNG"), Some("notes.txt")));
        assert!(!accepts(Some("application/pdf"), Some("photo.jpg")));
    }

    #[test]
    fn test_accepts_falls_back_to_extension() {
        assert!(accepts(None, Some("IMG_0001.JPG")));
        assert!(accepts(None, Some("facade.webp")));
        assert!(!accepts(None, Some("site.heic")));
        assert!(!accepts(None, Some("report.docx")));
        assert!(!accepts(None, None));
    }

    #[test]
    fn test_rejects_formats_without_decoder() {
        for mime in ["image/gif", "image/bmp", "image/heic", "image/svg+xml"] {
            assert!(!accepts(Some(mime), Some("photo.jpg")), "{}", mime);
        }
        assert!(accepts(Some("image/jpeg; charset=binary"), None));
        assert!(!accepts(None, Some("anim.gif")));
        assert_eq!(guess_mime_from_ext(Path::new("scan.bmp")), None);
    }
}
