use std::path::Path;

use bytes::Bytes;

use crate::constants::{DEFAULT_MIME, INLINE_THRESHOLD_BYTES};

/// An immutable media submission. The bytes are transmitted to the remote
/// service at most once per transcription call.
#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub bytes: Bytes,
    pub file_name: String,
    pub declared_mime: Option<String>,
}

impl MediaDescriptor {
    pub fn new(bytes: Bytes, file_name: impl Into<String>, declared_mime: Option<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            declared_mime,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn effective_mime(&self) -> String {
        resolve_mime(&self.file_name, self.declared_mime.as_deref())
    }

    pub fn route(&self) -> Route {
        route_for(self.size_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Inline,
    Upload,
}

pub fn route_for(size_bytes: u64) -> Route {
    if size_bytes >= INLINE_THRESHOLD_BYTES {
        Route::Upload
    } else {
        Route::Inline
    }
}

const EXTENSION_MIME: &[(&str, &str)] = &[
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("opus", "audio/opus"),
    ("flac", "audio/flac"),
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
    ("3gp", "video/3gpp"),
];

/// Resolution order: explicit declared type (unless it is the generic binary
/// placeholder), extension table, container guess, hard default. Total:
/// a plausible-but-wrong type beats blocking the pipeline.
pub fn resolve_mime(file_name: &str, declared: Option<&str>) -> String {
    if let Some(declared) = declared {
        if !declared.is_empty() && declared != "application/octet-stream" {
            return declared.to_string();
        }
    }

    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if let Some(ext) = ext.as_deref() {
        if let Some((_, mime)) = EXTENSION_MIME.iter().find(|(e, _)| *e == ext) {
            return (*mime).to_string();
        }
    }

    if let Some(guess) = mime_guess::from_path(file_name).first_raw() {
        if guess.starts_with("audio/") || guess.starts_with("video/") {
            return guess.to_string();
        }
    }

    DEFAULT_MIME.to_string()
}
