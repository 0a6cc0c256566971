//! Image attachments for vision pipelines
//!
//! Images travel to model backends as base64 text plus a mime type. Files
//! are format-sniffed and fully decoded once so that a corrupt or unsupported
//! image fails here rather than inside a model call.

use crate::error::{Result, SpatialMindError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A base64-encoded image ready to attach to a prompt
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    /// Standard base64, no data-URL prefix
    pub data: String,
}

impl fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("mime_type", &self.mime_type)
            .field("data", &format_args!("<{} base64 chars>", self.data.len()))
            .finish()
    }
}

impl ImageAttachment {
    /// Validate raw image bytes and encode them
    ///
    /// # Errors
    ///
    /// Returns an image error if the format is unknown or the data does not
    /// decode
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes)
            .map_err(|e| SpatialMindError::Image(format!("Unrecognized image format: {}", e)))?;
        image::load_from_memory_with_format(bytes, format)
            .map_err(|e| SpatialMindError::Image(format!("Invalid {:?} image: {}", format, e)))?;

        Ok(Self {
            mime_type: format.to_mime_type().to_string(),
            data: STANDARD.encode(bytes),
        })
    }

    /// Validate an image that arrived already base64-encoded
    ///
    /// A `data:<mime>;base64,` prefix is accepted and stripped. When
    /// `mime_type` is omitted it is taken from the sniffed format.
    ///
    /// # Errors
    ///
    /// Returns an image error if the text is not base64 or not an image
    pub fn from_base64(data: &str, mime_type: Option<&str>) -> Result<Self> {
        let payload = match data.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => data,
        };
        let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

        let bytes = STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| SpatialMindError::Image(format!("Image is not valid base64: {}", e)))?;

        let mut attachment = Self::from_bytes(&bytes)?;
        if let Some(mime) = mime_type.map(str::trim).filter(|m| !m.is_empty()) {
            if mime != attachment.mime_type {
                tracing::debug!(
                    declared = mime,
                    sniffed = %attachment.mime_type,
                    "Declared image type differs from content; using declared type"
                );
            }
            attachment.mime_type = mime.to_string();
        }
        Ok(attachment)
    }
}

/// Read and validate an image file
///
/// # Errors
///
/// Returns an image error if the file cannot be read or is not an image
pub fn load_image(path: impl AsRef<Path>) -> Result<ImageAttachment> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        SpatialMindError::Image(format!("Failed to read image {}: {}", path.display(), e))
    })?;

    let attachment = ImageAttachment::from_bytes(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        mime_type = %attachment.mime_type,
        bytes = bytes.len(),
        "Loaded image attachment"
    );
    Ok(attachment)
}
