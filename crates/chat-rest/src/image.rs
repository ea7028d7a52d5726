//! Image data URLs
//!
//! Avatars, icons and banners are uploaded inline as
//! `data:image/<type>;base64,<payload>`.

use crate::error::RestError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87: &[u8] = b"GIF87a";
const GIF89: &[u8] = b"GIF89a";

/// Detect the MIME type of raw image bytes
pub fn detect_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PNG) {
        Some("image/png")
    } else if bytes.starts_with(JPEG) {
        Some("image/jpeg")
    } else if bytes.starts_with(GIF87) || bytes.starts_with(GIF89) {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Encode raw image bytes as a data URL
pub fn to_data_url(field: &str, bytes: &[u8]) -> Result<String, RestError> {
    let mime = detect_mime(bytes).ok_or_else(|| invalid(field, "unrecognised image format"))?;
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

/// Check a caller-supplied data URL before it is sent
pub fn validate_data_url(field: &str, url: &str) -> Result<(), RestError> {
    let rest = url
        .strip_prefix("data:image/")
        .ok_or_else(|| invalid(field, "expected a data:image/ URL"))?;
    let (kind, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| invalid(field, "expected base64 encoding"))?;

    if !matches!(kind, "png" | "jpeg" | "jpg" | "gif" | "webp") {
        return Err(invalid(field, &format!("unsupported image type {kind}")));
    }
    if payload.is_empty() {
        return Err(invalid(field, "empty payload"));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| invalid(field, &e.to_string()))?;

    Ok(())
}

fn invalid(field: &str, reason: &str) -> RestError {
    RestError::InvalidImage {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
