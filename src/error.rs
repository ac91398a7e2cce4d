//! Error types for chapter-dl
//!
//! This module provides the error taxonomy used across the acquisition pipeline:
//! - [`FetchError`] classifies a single page/asset/rendering attempt
//! - [`ArchiveError`] covers container writing and verification
//! - [`Error`] is the crate-level error returned by setup-class operations
//!
//! Per-asset and per-chapter failures are normally absorbed and reported through
//! [`JobReport`](crate::types::JobReport) rather than returned as `Err`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for chapter-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chapter-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.workers")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error outside of a classified fetch attempt (client setup, etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error (settings file, rendering-service payloads)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A classified page, asset or rendering-service failure
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Container writing or verification failed
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Filesystem resource could not be prepared (fatal to the current job)
    #[error("resource error at {path}: {reason}")]
    Resource {
        /// Path that could not be created or written
        path: PathBuf,
        /// The underlying reason
        reason: String,
    },

    /// URL could not be parsed or has an unsupported shape
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation stopped because the session was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::Resource`] from a path and any displayable cause
    pub fn resource(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Resource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Machine-readable error code, suitable for event payloads and log fields
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Fetch(e) => e.error_code(),
            Error::Archive(e) => e.error_code(),
            Error::Resource { .. } => "resource_error",
            Error::InvalidUrl(_) => "invalid_url",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Low-level transport failure category
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Request or body read timed out
    Timeout,
    /// DNS, TCP connect or TLS handshake failure
    Connect,
    /// Request could not be sent (redirect loop, builder error, ...)
    Request,
    /// Response body could not be read to the end
    Body,
    /// Anything else reported by the HTTP client
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Timeout => "timeout",
            TransportKind::Connect => "connect",
            TransportKind::Request => "request",
            TransportKind::Body => "body",
            TransportKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Classified failure of a single HTTP attempt (page, asset or rendering call)
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// DNS/connect/TLS/timeout failure
    #[error("{kind} failure for {url}: {message}")]
    Transport {
        /// Requested URL
        url: String,
        /// Failure category
        kind: TransportKind,
        /// Client-provided description
        message: String,
    },

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// A bot-mitigation page was returned instead of the content
    #[error("challenge page detected for {url} ({marker})")]
    Challenge {
        /// Requested URL
        url: String,
        /// Marker string or status that identified the challenge
        marker: String,
    },

    /// Payload is not the expected kind (HTML instead of an image, unknown format, ...)
    #[error("invalid payload for {url}: {reason}")]
    Validation {
        /// Requested URL
        url: String,
        /// Why the payload was rejected
        reason: String,
    },

    /// The rendering service failed or returned nothing usable
    #[error("rendering service failed for {url}: {reason}")]
    Render {
        /// URL submitted to the rendering service
        url: String,
        /// Failure description
        reason: String,
    },
}

impl FetchError {
    /// Convert a reqwest error into a classified transport failure
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportKind::Body
        } else if err.is_request() || err.is_redirect() || err.is_builder() {
            TransportKind::Request
        } else {
            TransportKind::Other
        };
        FetchError::Transport {
            url: url.to_string(),
            kind,
            message: err.to_string(),
        }
    }

    /// URL the failed attempt targeted
    pub fn url(&self) -> &str {
        match self {
            FetchError::Transport { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Challenge { url, .. }
            | FetchError::Validation { url, .. }
            | FetchError::Render { url, .. } => url,
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::Transport { .. } => "transport_error",
            FetchError::Status { .. } => "http_status",
            FetchError::Challenge { .. } => "challenge_detected",
            FetchError::Validation { .. } => "validation_error",
            FetchError::Render { .. } => "render_error",
        }
    }
}

/// Container writing and verification errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Source directory holds no files to archive
    #[error("nothing to archive in {dir}")]
    Empty {
        /// The source directory
        dir: PathBuf,
    },

    /// Container could not be written
    #[error("failed to write container {path}: {reason}")]
    Write {
        /// Container path
        path: PathBuf,
        /// The reason writing failed
        reason: String,
    },

    /// Written container failed the structural integrity check
    #[error("integrity check failed for {path}: {reason}")]
    Integrity {
        /// Container path
        path: PathBuf,
        /// The reason verification failed
        reason: String,
    },

    /// Container is below the minimum plausible size
    #[error("container {path} is too small ({size} bytes, minimum {min})")]
    TooSmall {
        /// Container path
        path: PathBuf,
        /// Actual size in bytes
        size: u64,
        /// Required minimum in bytes
        min: u64,
    },

    /// Existing container cannot be edited as requested
    #[error("cannot edit {path}: {reason}")]
    InvalidArchive {
        /// Container path
        path: PathBuf,
        /// Why the edit was refused
        reason: String,
    },
}

impl ArchiveError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ArchiveError::Empty { .. } => "archive_empty",
            ArchiveError::Write { .. } => "archive_write_failed",
            ArchiveError::Integrity { .. } => "archive_integrity_failed",
            ArchiveError::TooSmall { .. } => "archive_too_small",
            ArchiveError::InvalidArchive { .. } => "archive_invalid",
        }
    }
}
