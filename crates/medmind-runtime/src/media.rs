//! Inline media for the reasoning request.
//!
//! Images and audio travel inside the request body as base64 with a MIME
//! type. Only `image/*` and `audio/*` files are accepted. A recording read
//! as audio may sit in a `video/*` container such as WebM and is sent with
//! the matching `audio/*` type.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use thiserror::Error;

/// Errors turning a file into a transmissible part.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is empty")]
    Empty { path: PathBuf },

    #[error("Unsupported media type {mime_type} for {path}")]
    UnsupportedType { path: PathBuf, mime_type: String },
}

/// A base64-encoded media attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPart {
    pub mime_type: String,
    /// Standard base64, no data-URL prefix.
    pub data: String,
    /// File name the part came from, if any.
    pub file_name: Option<String>,
}

impl MediaPart {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            file_name: None,
        }
    }

    /// Read and encode a file, guessing its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let mime_type = guess_mime(path)?;
        Self::read(path, mime_type).await
    }

    /// Read and encode a voice recording.
    pub async fn from_audio_path(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let mime_type = guess_audio_mime(path)?;
        Self::read(path, mime_type).await
    }

    async fn read(path: &Path, mime_type: String) -> Result<Self, MediaError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| MediaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(MediaError::Empty {
                path: path.to_path_buf(),
            });
        }

        tracing::debug!(path = %path.display(), mime_type = %mime_type, bytes = bytes.len(), "Encoded media");

        let mut part = Self::from_bytes(&bytes, mime_type);
        part.file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Ok(part)
    }
}

fn guess_mime(path: &Path) -> Result<String, MediaError> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    match mime.type_().as_str() {
        "image" | "audio" => Ok(mime.essence_str().to_string()),
        _ => Err(MediaError::UnsupportedType {
            path: path.to_path_buf(),
            mime_type: mime.essence_str().to_string(),
        }),
    }
}

fn guess_audio_mime(path: &Path) -> Result<String, MediaError> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    match mime.type_().as_str() {
        "audio" => Ok(mime.essence_str().to_string()),
        "video" => Ok(format!("audio/{}", mime.subtype().as_str())),
        _ => Err(MediaError::UnsupportedType {
            path: path.to_path_buf(),
            mime_type: mime.essence_str().to_string(),
        }),
    }
}
