//! Payload checks: HTML/challenge detection, image signature sniffing, fallback decoding

use crate::error::FetchError;
use crate::types::ContentKind;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// How many leading bytes are inspected for an HTML document
const HTML_SNIFF_LEN: usize = 1024;

/// Identify the image format from the payload's magic bytes
pub fn sniff(bytes: &[u8]) -> ContentKind {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => ContentKind::Jpeg,
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => ContentKind::Png,
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => ContentKind::Gif,
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => ContentKind::Webp,
        [_, _, _, _, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f' | b's', ..] => ContentKind::Avif,
        [b'B', b'M', ..] if bytes.len() > 26 => ContentKind::Bmp,
        _ => ContentKind::Unknown,
    }
}

/// Whether the payload is an HTML document (typically a challenge page)
pub fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(HTML_SNIFF_LEN)];
    let head = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    let head = head[start..].to_ascii_lowercase();

    head.starts_with(b"<!doctype html")
        || head.starts_with(b"<html")
        || head.windows(5).any(|w| w == b"<html")
}

/// Accept or reject a direct download
///
/// Empty and HTML payloads are always rejected; with `require_image` the payload must
/// also carry a recognised image signature.
pub fn validate_payload(
    url: &str,
    bytes: &[u8],
    require_image: bool,
) -> Result<ContentKind, FetchError> {
    if bytes.is_empty() {
        return Err(invalid(url, "empty payload"));
    }
    if looks_like_html(bytes) {
        return Err(invalid(url, "HTML page instead of image"));
    }
    let kind = sniff(bytes);
    if require_image && kind == ContentKind::Unknown {
        return Err(invalid(url, "unrecognised image signature"));
    }
    Ok(kind)
}

/// Bytes carried by a rendering-service response
///
/// The service returns either base64 (optionally as a `data:` URL) or the raw body
/// text; base64 is tried first.
pub fn decode_render_payload(text: &str) -> Vec<u8> {
    let trimmed = text.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,").map_or(trimmed, |(_, data)| data),
        None => trimmed,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => text.as_bytes().to_vec(),
    }
}

fn invalid(url: &str, reason: &str) -> FetchError {
    FetchError::Validation {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
