//! Utility functions for file naming and path manipulation

use crate::error::{Error, Result};
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use std::path::{Path, PathBuf};

/// Image extensions accepted when inferring a page's extension from its URL
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "jpe", "png", "webp", "avif", "gif", "bmp"];

/// Suffix of files that are still being written
pub const PARTIAL_SUFFIX: &str = "part";

/// Zero-padding width for `total` pages: the number of decimal digits of `total`
///
/// # Examples
///
/// ```
/// use chapter_dl::utils::padding_width;
///
/// assert_eq!(padding_width(9), 1);
/// assert_eq!(padding_width(12), 2);
/// assert_eq!(padding_width(100), 3);
/// ```
pub fn padding_width(total: usize) -> usize {
    total.max(1).to_string().len()
}

/// File name for the page at `index` (0-based) out of `total`
///
/// Names sort lexicographically in page order: `01.jpg` … `12.jpg`.
pub fn page_file_name(index: usize, total: usize, extension: &str) -> String {
    format!(
        "{:0width$}.{}",
        index + 1,
        extension,
        width = padding_width(total)
    )
}

/// Make a title or label safe to use as a single path component
///
/// Characters illegal on common filesystems are replaced by `_`; surrounding
/// whitespace is trimmed. Empty results become `"untitled"`.
pub fn sanitize_name(name: &str) -> String {
    let options = sanitize_filename::Options {
        windows: true,
        truncate: true,
        replacement: "_",
    };
    let cleaned = sanitize_filename::sanitize_with_options(name.trim(), options);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Image extension of a URL's last path segment, lowercased
///
/// Returns `None` when the URL does not parse or the extension is not a known image
/// type. Query strings and fragments are ignored.
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Decode the HTML character references that appear in embedded payloads and titles
///
/// Named references follow the HTML5 table, numeric ones may be decimal or hex.
/// Text holding an unknown or unterminated reference is returned unchanged.
pub fn decode_entities(text: &str) -> String {
    match unescape_with(text, resolve_html5_entity) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            tracing::trace!(error = %e, "leaving undecodable references as-is");
            text.to_string()
        }
    }
}

/// Path of the in-progress sibling of `path` (`01.jpg` → `01.jpg.part`)
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Write `bytes` to `path` through a `.part` file and a rename
///
/// A reader never observes a partially written file under its final name. On
/// failure the `.part` file is removed and a [`Error::Resource`] is returned.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp = partial_path(path);
    if let Err(e) = tokio::fs::write(&temp, bytes).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(Error::resource(&temp, e));
    }
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(Error::resource(path, e));
    }
    Ok(())
}

/// Size of the file at `path` when it exists and is strictly larger than `min_size`
pub fn existing_file_larger_than(path: &Path, min_size: u64) -> Option<u64> {
    let meta = std::fs::metadata(path).ok()?;
    (meta.is_file() && meta.len() > min_size).then_some(meta.len())
}
