//! CBZ container writing with integrity check and atomic commit
//!
//! A chapter directory becomes `<parent>/<title> - <label>.cbz`. The container is
//! written to a `.tmp` sibling, re-opened and fully read back (every entry's CRC is
//! checked by the reader), and only then renamed into place. The source directory is
//! removed after a successful commit; on any failure the temporary file is removed and
//! the directory is left untouched.

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Error, Result};
use crate::types::ArchiveResult;
use crate::utils::{IMAGE_EXTENSIONS, PARTIAL_SUFFIX, sanitize_name};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::FileOptions;

/// Suffix of a container that is still being written or verified
const TEMP_SUFFIX: &str = "tmp";

/// Suffix of the copy kept by [`Archiver::strip_trailing_pages`]
const BACKUP_SUFFIX: &str = "bak";

/// Packages chapter directories into verified containers
#[derive(Clone, Debug)]
pub struct Archiver {
    min_size: u64,
    extension: String,
}

impl Archiver {
    /// Create an archiver from the container settings
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            min_size: config.min_size_bytes,
            extension: config.extension.clone(),
        }
    }

    /// Container file name for a chapter: `<title> - <label>.<ext>`, both sanitized
    pub fn file_name(&self, title: &str, label: &str) -> String {
        format!(
            "{} - {}.{}",
            sanitize_name(title),
            sanitize_name(label),
            self.extension
        )
    }

    /// Container path for a chapter directory (a sibling of the directory)
    pub fn output_path(&self, dir: &Path, title: &str, label: &str) -> PathBuf {
        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        parent.join(self.file_name(title, label))
    }

    /// An already committed container in `series_dir`, if it is above the minimum size
    pub fn find_existing(&self, series_dir: &Path, title: &str, label: &str) -> Option<ArchiveResult> {
        let path = series_dir.join(self.file_name(title, label));
        crate::utils::existing_file_larger_than(&path, self.min_size).map(|size_bytes| {
            ArchiveResult {
                path,
                size_bytes,
                verified: true,
            }
        })
    }

    /// Package `dir` into its container and remove `dir` on success
    ///
    /// Runs on the blocking pool.
    ///
    /// # Errors
    /// [`Error::Archive`] when the directory is empty, the container cannot be written,
    /// fails verification or is below the minimum size. `dir` is preserved in every
    /// error case.
    pub async fn archive(&self, dir: &Path, title: &str, label: &str) -> Result<ArchiveResult> {
        let output = self.output_path(dir, title, label);
        let dir_owned = dir.to_path_buf();
        let min_size = self.min_size;

        let result = spawn_blocking(move || archive_dir(&dir_owned, &output, min_size))
            .await
            .map_err(|e| Error::Other(format!("archive task panicked: {e}")))?;

        match &result {
            Ok(archive) => info!(
                path = %archive.path.display(),
                size_bytes = archive.size_bytes,
                "container committed"
            ),
            Err(e) => warn!(dir = %dir.display(), error = %e, "archival failed, pages kept"),
        }
        result.map_err(Error::from)
    }

    /// Remove the last `count` image entries from an existing container
    ///
    /// The original is kept next to it as `<name>.bak`. Non-image entries are carried
    /// over untouched.
    ///
    /// # Errors
    /// [`ArchiveError::InvalidArchive`] when the container holds `count` images or
    /// fewer, or cannot be read; write and verification errors as for [`archive`].
    ///
    /// [`archive`]: Archiver::archive
    pub async fn strip_trailing_pages(&self, container: &Path, count: usize) -> Result<ArchiveResult> {
        let container = container.to_path_buf();
        spawn_blocking(move || strip_trailing(&container, count))
            .await
            .map_err(|e| Error::Other(format!("archive task panicked: {e}")))?
            .map_err(Error::from)
    }
}

fn archive_dir(dir: &Path, output: &Path, min_size: u64) -> std::result::Result<ArchiveResult, ArchiveError> {
    let files = list_pages(dir)?;
    if files.is_empty() {
        return Err(ArchiveError::Empty {
            dir: dir.to_path_buf(),
        });
    }

    let temp = sibling_with_suffix(output, TEMP_SUFFIX);
    let result = write_container(&temp, &files)
        .and_then(|()| verify(&temp, files.len()))
        .and_then(|size| check_size(&temp, size, min_size));

    let size_bytes = match result {
        Ok(size) => size,
        Err(e) => {
            let _ = std::fs::remove_file(&temp);
            return Err(e);
        }
    };

    if let Err(e) = std::fs::rename(&temp, output) {
        let _ = std::fs::remove_file(&temp);
        return Err(write_error(output, e));
    }

    debug!(dir = %dir.display(), entries = files.len(), "removing archived pages");
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "container committed but page directory could not be removed");
    }

    Ok(ArchiveResult {
        path: output.to_path_buf(),
        size_bytes,
        verified: true,
    })
}

/// Regular files of `dir` in lexicographic order, `.part` leftovers excluded
fn list_pages(dir: &Path) -> std::result::Result<Vec<PathBuf>, ArchiveError> {
    let entries = std::fs::read_dir(dir).map_err(|e| write_error(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| write_error(dir, e))?.path();
        if !path.is_file() {
            continue;
        }
        let is_partial = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PARTIAL_SUFFIX));
        if is_partial {
            debug!(path = %path.display(), "skipping partial file");
            continue;
        }
        files.push(path);
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn write_container(path: &Path, files: &[PathBuf]) -> std::result::Result<(), ArchiveError> {
    let file = File::create(path).map_err(|e| write_error(path, e))?;
    let mut writer = zip::ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    for source in files {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| write_error(path, format!("unnamed entry {}", source.display())))?;
        writer
            .start_file(name, options)
            .map_err(|e| write_error(path, e))?;
        let mut input = BufReader::new(File::open(source).map_err(|e| write_error(source, e))?);
        std::io::copy(&mut input, &mut writer).map_err(|e| write_error(path, e))?;
    }

    let mut inner = writer.finish().map_err(|e| write_error(path, e))?;
    inner.flush().map_err(|e| write_error(path, e))?;
    inner
        .get_ref()
        .sync_all()
        .map_err(|e| write_error(path, e))?;
    Ok(())
}

/// Re-open the container, read every entry to the end and compare the entry count
///
/// Returns the container size.
fn verify(path: &Path, expected_entries: usize) -> std::result::Result<u64, ArchiveError> {
    let file = File::open(path).map_err(|e| integrity_error(path, e))?;
    let size = file.metadata().map_err(|e| integrity_error(path, e))?.len();
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| integrity_error(path, e))?;

    if archive.len() != expected_entries {
        return Err(integrity_error(
            path,
            format!("{} entries, expected {expected_entries}", archive.len()),
        ));
    }

    let mut sink = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| integrity_error(path, e))?;
        sink.clear();
        entry
            .read_to_end(&mut sink)
            .map_err(|e| integrity_error(path, format!("entry {}: {e}", entry.name())))?;
    }
    Ok(size)
}

fn check_size(path: &Path, size: u64, min: u64) -> std::result::Result<u64, ArchiveError> {
    if size <= min {
        return Err(ArchiveError::TooSmall {
            path: path.to_path_buf(),
            size,
            min,
        });
    }
    Ok(size)
}

fn strip_trailing(container: &Path, count: usize) -> std::result::Result<ArchiveResult, ArchiveError> {
    let invalid = |reason: String| ArchiveError::InvalidArchive {
        path: container.to_path_buf(),
        reason,
    };

    let file = File::open(container).map_err(|e| invalid(e.to_string()))?;
    let mut source = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| invalid(e.to_string()))?;

    let mut names: Vec<String> = source.file_names().map(str::to_string).collect();
    names.sort();
    let images: Vec<&String> = names
        .iter()
        .filter(|n| is_image_entry(n))
        .collect();
    if images.len() <= count {
        return Err(invalid(format!(
            "{} image(s), cannot remove {count}",
            images.len()
        )));
    }
    let removed: Vec<String> = images[images.len() - count..]
        .iter()
        .map(|n| (*n).clone())
        .collect();
    let kept: Vec<&String> = names.iter().filter(|n| !removed.contains(n)).collect();

    let backup = sibling_with_suffix(container, BACKUP_SUFFIX);
    std::fs::copy(container, &backup).map_err(|e| write_error(&backup, e))?;

    let temp = sibling_with_suffix(container, TEMP_SUFFIX);
    let written = copy_entries(&mut source, &temp, &kept).and_then(|()| verify(&temp, kept.len()));
    let size_bytes = match written {
        Ok(size) => size,
        Err(e) => {
            let _ = std::fs::remove_file(&temp);
            return Err(e);
        }
    };
    drop(source);

    if let Err(e) = std::fs::rename(&temp, container) {
        let _ = std::fs::remove_file(&temp);
        return Err(write_error(container, e));
    }

    info!(
        path = %container.display(),
        removed = count,
        remaining = kept.len(),
        backup = %backup.display(),
        "trailing pages removed"
    );
    Ok(ArchiveResult {
        path: container.to_path_buf(),
        size_bytes,
        verified: true,
    })
}

fn copy_entries<R: Read + std::io::Seek>(
    source: &mut zip::ZipArchive<R>,
    target: &Path,
    names: &[&String],
) -> std::result::Result<(), ArchiveError> {
    let file = File::create(target).map_err(|e| write_error(target, e))?;
    let mut writer = zip::ZipWriter::new(BufWriter::new(file));
    for name in names {
        let entry = source
            .by_name(name)
            .map_err(|e| write_error(target, e))?;
        writer.raw_copy_file(entry).map_err(|e| write_error(target, e))?;
    }
    let mut inner = writer.finish().map_err(|e| write_error(target, e))?;
    inner.flush().map_err(|e| write_error(target, e))?;
    Ok(())
}

fn is_image_entry(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn write_error(path: &Path, reason: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Write {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn integrity_error(path: &Path, reason: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Integrity {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archiver(min_size: u64) -> Archiver {
        Archiver::new(&ArchiveConfig {
            min_size_bytes: min_size,
            ..ArchiveConfig::default()
        })
    }

    /// Chapter directory `<tmp>/Series/Vol 1` with `pages` files of 2 KiB each
    fn chapter_dir(tmp: &TempDir, pages: usize) -> PathBuf {
        let dir = tmp.path().join("Series").join("Vol 1");
        std::fs::create_dir_all(&dir).unwrap();
        for i in 1..=pages {
            let name = crate::utils::page_file_name(i - 1, pages, "jpg");
            std::fs::write(dir.join(name), vec![i as u8; 2048]).unwrap();
        }
        dir
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn output_is_a_sibling_named_after_title_and_label() {
        let archiver = archiver(0);
        let out = archiver.output_path(Path::new("/data/One Piece/Vol 1"), "One Piece", "Vol 1");
        assert_eq!(out, PathBuf::from("/data/One Piece/One Piece - Vol 1.cbz"));
        assert_eq!(archiver.file_name("A/B", "C:D"), "A_B - C_D.cbz");
    }

    #[tokio::test]
    async fn archives_in_lexicographic_order_and_removes_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = chapter_dir(&tmp, 12);
        std::fs::write(dir.join("05.jpg.part"), b"partial").unwrap();

        let result = archiver(10_000).archive(&dir, "Series", "Vol 1").await.unwrap();

        assert!(result.verified);
        assert_eq!(result.path, tmp.path().join("Series").join("Series - Vol 1.cbz"));
        assert!(!dir.exists(), "source removed after commit");
        let expected: Vec<String> = (1..=12).map(|i| format!("{i:02}.jpg")).collect();
        assert_eq!(entry_names(&result.path), expected, "entries written in page order");
    }

    #[tokio::test]
    async fn entries_are_stored_uncompressed() {
        let tmp = TempDir::new().unwrap();
        let dir = chapter_dir(&tmp, 2);

        let result = archiver(0).archive(&dir, "Series", "Vol 1").await.unwrap();
        let mut archive = zip::ZipArchive::new(File::open(&result.path).unwrap()).unwrap();
        let entry = archive.by_index(0).unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
        assert_eq!(entry.size(), 2048);
    }

    #[tokio::test]
    async fn too_small_container_is_rolled_back() {
        let tmp = TempDir::new().unwrap();
        let dir = chapter_dir(&tmp, 2);

        let err = archiver(1_000_000).archive(&dir, "Series", "Vol 1").await.unwrap_err();

        assert!(matches!(err, Error::Archive(ArchiveError::TooSmall { .. })));
        assert!(dir.join("1.jpg").exists(), "pages preserved");
        assert!(dir.join("2.jpg").exists());
        let parent = tmp.path().join("Series");
        assert!(!parent.join("Series - Vol 1.cbz").exists());
        assert!(!parent.join("Series - Vol 1.cbz.tmp").exists());
    }

    #[tokio::test]
    async fn empty_directory_is_refused() {
        let tmp = TempDir::new().unwrap();
        let dir = chapter_dir(&tmp, 0);
        std::fs::write(dir.join("01.jpg.part"), b"partial").unwrap();

        let err = archiver(0).archive(&dir, "Series", "Vol 1").await.unwrap_err();
        assert!(matches!(err, Error::Archive(ArchiveError::Empty { .. })));
        assert!(dir.exists());
    }

    #[test]
    fn verify_rejects_wrong_entry_count_and_garbage() {
        let tmp = TempDir::new().unwrap();
        let dir = chapter_dir(&tmp, 3);
        let files = list_pages(&dir).unwrap();
        let container = tmp.path().join("c.cbz");
        write_container(&container, &files).unwrap();

        assert!(verify(&container, 3).is_ok());
        assert!(matches!(
            verify(&container, 4),
            Err(ArchiveError::Integrity { .. })
        ));

        let garbage = tmp.path().join("g.cbz");
        std::fs::write(&garbage, vec![0u8; 20_000]).unwrap();
        assert!(matches!(verify(&garbage, 1), Err(ArchiveError::Integrity { .. })));
    }

    #[test]
    fn verify_detects_corrupted_entry_data() {
        let tmp = TempDir::new().unwrap();
        let dir = chapter_dir(&tmp, 1);
        let files = list_pages(&dir).unwrap();
        let container = tmp.path().join("c.cbz");
        write_container(&container, &files).unwrap();

        // Flip a byte inside the stored payload (after the 30-byte local header + name)
        let mut bytes = std::fs::read(&container).unwrap();
        bytes[30 + "1.jpg".len() + 100] ^= 0xFF;
        std::fs::write(&container, bytes).unwrap();

        assert!(matches!(verify(&container, 1), Err(ArchiveError::Integrity { .. })));
    }

    #[test]
    fn find_existing_respects_minimum_size() {
        let tmp = TempDir::new().unwrap();
        let archiver = archiver(100);
        assert!(archiver.find_existing(tmp.path(), "S", "V").is_none());

        std::fs::write(tmp.path().join("S - V.cbz"), vec![0u8; 50]).unwrap();
        assert!(archiver.find_existing(tmp.path(), "S", "V").is_none());

        std::fs::write(tmp.path().join("S - V.cbz"), vec![0u8; 500]).unwrap();
        let found = archiver.find_existing(tmp.path(), "S", "V").unwrap();
        assert_eq!(found.size_bytes, 500);
    }

    #[tokio::test]
    async fn strip_trailing_pages_keeps_backup() {
        let tmp = TempDir::new().unwrap();
        let dir = chapter_dir(&tmp, 5);
        let archiver = archiver(0);
        let result = archiver.archive(&dir, "Series", "Vol 1").await.unwrap();

        let stripped = archiver.strip_trailing_pages(&result.path, 2).await.unwrap();

        assert_eq!(entry_names(&stripped.path), ["1.jpg", "2.jpg", "3.jpg"]);
        let backup = sibling_with_suffix(&result.path, BACKUP_SUFFIX);
        assert_eq!(entry_names(&backup).len(), 5);
    }

    #[tokio::test]
    async fn strip_refuses_to_remove_every_page() {
        let tmp = TempDir::new().unwrap();
        let dir = chapter_dir(&tmp, 2);
        let archiver = archiver(0);
        let result = archiver.archive(&dir, "Series", "Vol 1").await.unwrap();

        let err = archiver.strip_trailing_pages(&result.path, 2).await.unwrap_err();
        assert!(matches!(err, Error::Archive(ArchiveError::InvalidArchive { .. })));
        assert_eq!(entry_names(&result.path).len(), 2, "container untouched");
        assert!(!sibling_with_suffix(&result.path, BACKUP_SUFFIX).exists());
    }
}
