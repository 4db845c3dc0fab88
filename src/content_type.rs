//! Extension allowlist for uploadable media.
//!
//! Session creation fails for filenames whose extension is not listed here;
//! the same table backs content-type resolution when streaming objects whose
//! stored metadata is missing.

use std::collections::HashMap;

use once_cell::sync::Lazy;

static CONTENT_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("mp4", "video/mp4"),
        ("pdf", "application/pdf"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("png", "image/png"),
        ("gif", "image/gif"),
        ("webp", "image/webp"),
        ("mov", "video/quicktime"),
        ("avi", "video/x-msvideo"),
        ("mkv", "video/x-matroska"),
        ("mp3", "audio/mpeg"),
        ("wav", "audio/wav"),
        ("m4a", "audio/mp4"),
    ])
});

/// Look up the content type for a bare extension (no leading dot).
pub fn for_extension(extension: &str) -> Option<&'static str> {
    CONTENT_TYPES
        .get(extension.to_ascii_lowercase().as_str())
        .copied()
}

/// Extract the extension from a filename, if it has one.
pub fn extension_of(filename: &str) -> Option<&str> {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// Look up the content type for a filename via its extension.
pub fn for_filename(filename: &str) -> Option<&'static str> {
    extension_of(filename).and_then(for_extension)
}
