//! Core types for chapter-dl

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

/// Site variant a chapter is served from
///
/// `Fr` pages embed decorative/advertising images from a shared upload path and
/// need filtering; `Net` pages do not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// The `.fr` variant (filtered)
    Fr,
    /// The `.net` variant (unfiltered)
    Net,
}

impl Domain {
    /// Infer the variant from a URL host: `.fr` TLD → `Fr`, anything else → `Net`
    pub fn from_url(url: &str) -> Self {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        match host {
            Some(h) if h.ends_with(".fr") => Domain::Fr,
            _ => Domain::Net,
        }
    }

    /// Short lowercase name ("fr" / "net")
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Fr => "fr",
            Domain::Net => "net",
        }
    }

    /// Whether resolved asset lists from this variant go through the parasite filter
    pub fn is_filtered(&self) -> bool {
        matches!(self, Domain::Fr)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one chapter page
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Human label ("Volume 3", "Chapter 1042")
    pub label: String,
    /// Absolute URL of the reader page
    pub source_url: String,
    /// Site variant
    pub domain: Domain,
}

impl ChapterRef {
    /// Create a chapter reference, inferring the domain from the URL
    pub fn new(label: impl Into<String>, source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let domain = Domain::from_url(&source_url);
        Self {
            label: label.into(),
            source_url,
            domain,
        }
    }

    /// Override the inferred domain
    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    /// Site root of the chapter URL (`scheme://host[:port]/`), used as asset Referer
    pub fn site_root(&self) -> Option<String> {
        let url = url::Url::parse(&self.source_url).ok()?;
        let origin = url.origin();
        origin
            .is_tuple()
            .then(|| format!("{}/", origin.ascii_serialization()))
    }
}

/// Ordered, de-duplicated list of asset URLs for one chapter
///
/// Empty is a valid terminal state ("no assets resolved").
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetList(Vec<String>);

impl AssetList {
    /// Build from URLs, dropping duplicates while preserving first-seen order
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for url in urls {
            let url = url.into();
            if seen.insert(url.clone()) {
                list.push(url);
            }
        }
        Self(list)
    }

    /// Number of assets
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was resolved
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate URLs in page order
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    /// URLs as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a AssetList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Image format sniffed from a payload's leading bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// JPEG (FF D8 FF)
    Jpeg,
    /// PNG
    Png,
    /// GIF87a / GIF89a
    Gif,
    /// RIFF WebP
    Webp,
    /// AVIF (ISO BMFF with an avif brand)
    Avif,
    /// Windows bitmap
    Bmp,
    /// Not a recognised image signature
    Unknown,
}

impl ContentKind {
    /// Canonical file extension, `None` for `Unknown`
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ContentKind::Jpeg => Some("jpg"),
            ContentKind::Png => Some("png"),
            ContentKind::Gif => Some("gif"),
            ContentKind::Webp => Some("webp"),
            ContentKind::Avif => Some("avif"),
            ContentKind::Bmp => Some("bmp"),
            ContentKind::Unknown => None,
        }
    }
}

/// Outcome of a single fetch attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Payload accepted
    Success {
        /// Payload size
        size_bytes: u64,
        /// Sniffed format
        kind: ContentKind,
    },
    /// Failed, eligible for another attempt
    RetryableFailure {
        /// Error description
        reason: String,
    },
    /// Failed, no further direct attempts
    TerminalFailure {
        /// Error description
        reason: String,
    },
}

/// Record of one attempt at fetching an asset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    /// Asset URL
    pub url: String,
    /// 1-based attempt number (the rendering fallback follows the direct attempts)
    pub attempt_number: u32,
    /// True for the rendering-service fallback attempt
    pub via_render: bool,
    /// What happened
    pub outcome: AttemptOutcome,
}

/// Chapter download job state
///
/// `Pending → Running → {Completed, PartiallyFailed, Cancelled}`; `Failed` covers
/// setup errors and archival failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, nothing started
    Pending,
    /// Worker pool active
    Running,
    /// Every asset downloaded (and archived when enabled)
    Completed,
    /// At least one asset failed; source directory kept
    PartiallyFailed,
    /// Stopped by cancellation; no archive
    Cancelled,
    /// Destination not creatable or archival failed
    Failed,
}

impl JobState {
    /// Whether the job has reached a final state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::PartiallyFailed => "partially_failed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A committed, verified container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveResult {
    /// Final container path
    pub path: PathBuf,
    /// Size on disk
    pub size_bytes: u64,
    /// Passed the integrity check
    pub verified: bool,
}

/// Final report of one chapter job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobReport {
    /// The chapter
    pub chapter: ChapterRef,
    /// Final state
    pub state: JobState,
    /// Number of assets scheduled
    pub total: usize,
    /// Number of assets written
    pub completed: usize,
    /// URLs that could not be fetched
    pub failed_urls: BTreeSet<String>,
    /// Destination directory of the page files
    pub destination: PathBuf,
    /// Container, when one was written or already existed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveResult>,
    /// True when a verified container already existed and nothing was downloaded
    pub already_archived: bool,
    /// Setup or archival error, for `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a multi-chapter session
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionReport {
    /// One report per chapter that went through the coordinator (last run wins)
    pub jobs: Vec<JobReport>,
    /// Chapters skipped because their container already existed
    pub skipped: Vec<ChapterRef>,
    /// Chapters that resolved to zero assets on both passes
    pub unresolved: Vec<ChapterRef>,
    /// Session stopped by cancellation
    pub cancelled: bool,
}

impl SessionReport {
    /// Number of jobs in the given state
    pub fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }

    /// True when every chapter either completed or was skipped
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.unresolved.is_empty()
            && self.jobs.iter().all(|j| j.state == JobState::Completed)
    }
}

/// Extraction tier that produced an asset list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveTier {
    /// Embedded reader JSON payload
    ReaderJson,
    /// Reader container markup
    ReaderMarkup,
    /// Raw image-tag pattern scan
    RawPattern,
}

impl std::fmt::Display for ResolveTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolveTier::ReaderJson => "reader_json",
            ResolveTier::ReaderMarkup => "reader_markup",
            ResolveTier::RawPattern => "raw_pattern",
        };
        f.write_str(s)
    }
}

/// Event emitted during the acquisition lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Chapter processing started
    ChapterStarted {
        /// Chapter label
        chapter: String,
        /// Reader page URL
        url: String,
    },

    /// Asset list resolved
    Resolved {
        /// Chapter label
        chapter: String,
        /// Tier that produced the list
        tier: ResolveTier,
        /// True when the list came from a rendered document
        rendered: bool,
        /// Challenge marker that forced the rendered path, if any
        challenged: Option<String>,
        /// Number of assets
        assets: usize,
    },

    /// Resolution produced no assets; the chapter is retried after the main pass
    ResolveDeferred {
        /// Chapter label
        chapter: String,
    },

    /// Resolution produced no assets on the deferred pass either
    Unresolved {
        /// Chapter label
        chapter: String,
    },

    /// Job state transition
    JobStateChanged {
        /// Chapter label
        chapter: String,
        /// New state
        state: JobState,
    },

    /// Asset progress (monotonic per job)
    Progress {
        /// Chapter label
        chapter: String,
        /// Assets finished (written or failed)
        done: usize,
        /// Assets scheduled
        total: usize,
    },

    /// An asset could not be fetched by any transport
    AssetFailed {
        /// Chapter label
        chapter: String,
        /// Asset URL
        url: String,
        /// Last error
        error: String,
    },

    /// Container committed
    Archived {
        /// Chapter label
        chapter: String,
        /// Container path
        path: PathBuf,
        /// Container size
        size_bytes: u64,
    },

    /// Container could not be written or verified; page files kept
    ArchiveFailed {
        /// Chapter label
        chapter: String,
        /// Error description
        error: String,
    },

    /// Chapter skipped because its container already exists
    ChapterSkipped {
        /// Chapter label
        chapter: String,
        /// Existing container
        archive: PathBuf,
    },

    /// Stored credentials are older than the staleness window
    CredentialsStale {
        /// Age in seconds
        age_secs: u64,
    },

    /// Session ended
    SessionFinished {
        /// Chapters completed
        completed: usize,
        /// Chapters with missing assets
        partially_failed: usize,
        /// Chapters failed at setup or archival
        failed: usize,
        /// Chapters skipped (already archived)
        skipped: usize,
        /// Chapters that never resolved
        unresolved: usize,
        /// Stopped by cancellation
        cancelled: bool,
    },
}
