//! Base64 transport encoding and upload validation.

use crate::error::{PortraitVizError, Result};
use crate::image::types::{EncodedImage, ImageFormat, SourceImage};
use base64::Engine;
use std::path::Path;

/// Encodes raw bytes as standard base64.
pub fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes base64 that may be imperfectly formatted.
///
/// Accepts a `data:<mime>;base64,` prefix, embedded whitespace and missing
/// `=` padding.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    let b64 = match input.find(";base64,") {
        Some(pos) => &input[pos + 8..],
        None => input,
    };

    let cleaned: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if let Ok(data) = base64::engine::general_purpose::STANDARD.decode(&cleaned) {
        return Ok(data);
    }

    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(cleaned.trim_end_matches('='))
        .map_err(|e| PortraitVizError::Decode(e.to_string()))
}

/// Validates uploaded bytes and wraps them as a [`SourceImage`].
///
/// The format comes from the magic bytes; the extension of `file_name` is only
/// consulted when the bytes are too short to sniff.
pub fn source_from_bytes(bytes: &[u8], file_name: Option<&str>) -> Result<SourceImage> {
    if bytes.is_empty() {
        return Err(PortraitVizError::InvalidUpload("file is empty".into()));
    }

    let format = ImageFormat::from_magic_bytes(bytes)
        .or_else(|| {
            if bytes.len() >= 12 {
                return None;
            }
            file_name
                .and_then(|n| Path::new(n).extension())
                .and_then(|e| e.to_str())
                .and_then(ImageFormat::from_extension)
        })
        .ok_or_else(|| {
            PortraitVizError::InvalidUpload(format!(
                "{} is not a supported image (png, jpeg, webp, gif)",
                file_name.unwrap_or("upload")
            ))
        })?;

    let source = SourceImage::new(EncodedImage::from_bytes(bytes, format));
    Ok(match file_name {
        Some(name) => source.with_file_name(name),
        None => source,
    })
}

/// Reads an uploaded image from disk.
///
/// Unreadable files and non-images both fail with
/// [`PortraitVizError::InvalidUpload`].
pub async fn read_upload(path: impl AsRef<Path>) -> Result<SourceImage> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        PortraitVizError::InvalidUpload(format!("cannot read {}: {e}", path.display()))
    })?;

    let file_name = path.file_name().and_then(|n| n.to_str());
    let source = source_from_bytes(&bytes, file_name)?;
    tracing::debug!(
        path = %path.display(),
        mime_type = source.mime_type(),
        size_bytes = bytes.len(),
        "loaded source image"
    );
    Ok(source)
}
