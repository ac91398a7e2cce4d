//! Configuration types for chapter-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (directories, concurrency, pacing)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory; each series gets a sub-directory (default: "./downloads")
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Size of the per-chapter worker pool (default: 3)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pause between scheduling two asset tasks (default: 500 ms)
    #[serde(default = "default_task_stagger", with = "duration_ms_serde")]
    pub task_stagger: Duration,

    /// Pause between two chapters of a session (default: 2 s)
    #[serde(default = "default_chapter_delay", with = "duration_ms_serde")]
    pub chapter_delay: Duration,

    /// Require downloaded payloads to carry a recognised image signature (default: true)
    ///
    /// When disabled, only the HTML/challenge check is applied.
    #[serde(default = "default_true")]
    pub validate_images: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            workers: default_workers(),
            task_stagger: default_task_stagger(),
            chapter_delay: default_chapter_delay(),
            validate_images: true,
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of direct attempts, including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Extra factor applied to rate-limited/forbidden failures (default: 2.0)
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
            jitter: true,
        }
    }
}

/// Asset resolution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Pause before the direct chapter request (default: 1 s)
    #[serde(default = "default_request_delay", with = "duration_ms_serde")]
    pub request_delay: Duration,

    /// Retry policy for transport failures of the direct page request
    #[serde(default = "default_page_retry")]
    pub page_retry: RetryConfig,

    /// Body markers identifying a bot-mitigation page
    #[serde(default = "default_challenge_markers")]
    pub challenge_markers: Vec<String>,

    /// URL keywords identifying decorative/advertising images (filtered domain only)
    #[serde(default = "default_parasite_keywords")]
    pub parasite_keywords: Vec<String>,

    /// Shared upload path the filtered domain serves parasite images from
    #[serde(default = "default_parasite_path")]
    pub parasite_path: String,

    /// Rewrite `http://` URLs of the reader payload to `https://` (default: true)
    #[serde(default = "default_true")]
    pub upgrade_insecure_assets: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            request_delay: default_request_delay(),
            page_retry: default_page_retry(),
            challenge_markers: default_challenge_markers(),
            parasite_keywords: default_parasite_keywords(),
            parasite_path: default_parasite_path(),
            upgrade_insecure_assets: true,
        }
    }
}

/// HTTP transport settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Fallback User-Agent when the credential identity is empty
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept-Language header value (default: "fr-FR,fr;q=0.9")
    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Timeout for page requests (default: 10 s)
    #[serde(default = "default_page_timeout", with = "duration_ms_serde")]
    pub page_timeout: Duration,

    /// Timeout for asset requests (default: 20 s)
    #[serde(default = "default_asset_timeout", with = "duration_ms_serde")]
    pub asset_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            page_timeout: default_page_timeout(),
            asset_timeout: default_asset_timeout(),
        }
    }
}

/// Rendering-service (headless browser proxy) settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderServiceConfig {
    /// Base URL; requests go to `{base_url}/v1` (default: "http://localhost:8191")
    #[serde(default = "default_render_base_url")]
    pub base_url: String,

    /// Use the rendering service as a fallback transport (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Budget for rendering a chapter page (default: 60 s)
    #[serde(default = "default_render_page_timeout", with = "duration_ms_serde")]
    pub page_timeout: Duration,

    /// Budget for proxying a single asset (default: 90 s)
    #[serde(default = "default_render_asset_timeout", with = "duration_ms_serde")]
    pub asset_timeout: Duration,
}

impl Default for RenderServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_render_base_url(),
            enabled: true,
            page_timeout: default_render_page_timeout(),
            asset_timeout: default_render_asset_timeout(),
        }
    }
}

/// Container output settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Package completed chapters into a container (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Containers at or below this size are treated as truncated (default: 10000)
    #[serde(default = "default_min_archive_size")]
    pub min_size_bytes: u64,

    /// Container file extension (default: "cbz")
    #[serde(default = "default_archive_extension")]
    pub extension: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size_bytes: default_min_archive_size(),
            extension: default_archive_extension(),
        }
    }
}

/// Credential handling policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Cookie carrying the clearance token (default: "cf_clearance")
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Marker a valid probe page must contain (default: "entry-title")
    #[serde(default = "default_probe_marker")]
    pub probe_marker: String,

    /// Age after which tokens are reported stale (default: 1 hour)
    #[serde(default = "default_stale_after", with = "duration_ms_serde")]
    pub stale_after: Duration,

    /// Interval of the staleness watcher (default: 1 hour)
    #[serde(default = "default_stale_check_interval", with = "duration_ms_serde")]
    pub check_interval: Duration,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            probe_marker: default_probe_marker(),
            stale_after: default_stale_after(),
            check_interval: default_stale_check_interval(),
        }
    }
}

/// Main configuration
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directories, worker pool, pacing
/// - [`retry`](RetryConfig) - per-asset retry policy
/// - [`resolver`](ResolverConfig) - extraction heuristics and page retry
/// - [`http`](HttpConfig) - headers and timeouts
/// - [`render`](RenderServiceConfig) - rendering-service fallback
/// - [`archive`](ArchiveConfig) - container output
/// - [`credentials`](CredentialsConfig) - token cookie and staleness policy
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Per-asset retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Rendering-service settings
    #[serde(default)]
    pub render: RenderServiceConfig,

    /// Archive settings
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Credential policy
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

impl Config {
    /// Check for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.workers == 0 {
            return Err(config_error("worker pool size must be at least 1", "download.workers"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "at least one direct attempt is required",
                "retry.max_attempts",
            ));
        }
        if self.resolver.page_retry.max_attempts == 0 {
            return Err(config_error(
                "at least one direct page attempt is required",
                "resolver.page_retry.max_attempts",
            ));
        }
        for (key, multiplier) in [
            ("retry.backoff_multiplier", self.retry.backoff_multiplier),
            ("retry.rate_limit_multiplier", self.retry.rate_limit_multiplier),
        ] {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(config_error("multiplier must be a finite value >= 1.0", key));
            }
        }
        if self.render.enabled && url::Url::parse(&self.render.base_url).is_err() {
            return Err(config_error(
                format!("invalid rendering service URL: {}", self.render.base_url),
                "render.base_url",
            ));
        }
        if self.archive.extension.is_empty() || self.archive.extension.contains('.') {
            return Err(config_error(
                "extension must be non-empty and without a dot",
                "archive.extension",
            ));
        }
        Ok(())
    }

    /// Directory that receives a series' chapter folders and containers
    pub fn series_dir(&self, title: &str) -> PathBuf {
        self.download
            .root_dir
            .join(crate::utils::sanitize_name(title))
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_workers() -> usize {
    3
}

fn default_task_stagger() -> Duration {
    Duration::from_millis(500)
}

fn default_chapter_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_rate_limit_multiplier() -> f64 {
    2.0
}

fn default_request_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_page_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_secs(5),
        ..RetryConfig::default()
    }
}

fn default_challenge_markers() -> Vec<String> {
    [
        "cf-challenge",
        "cf-browser-verification",
        "Just a moment",
        "DDoS protection by Cloudflare",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_parasite_keywords() -> Vec<String> {
    ["ads", "sponsor", "banner", "footer", "cover", "logo", "pub"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_parasite_path() -> String {
    "/wp-content/uploads/".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

fn default_accept_language() -> String {
    "fr-FR,fr;q=0.9".to_string()
}

fn default_page_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_asset_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_render_base_url() -> String {
    "http://localhost:8191".to_string()
}

fn default_render_page_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_render_asset_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_min_archive_size() -> u64 {
    10_000
}

fn default_archive_extension() -> String {
    "cbz".to_string()
}

fn default_cookie_name() -> String {
    "cf_clearance".to_string()
}

fn default_probe_marker() -> String {
    "entry-title".to_string()
}

fn default_stale_after() -> Duration {
    Duration::from_secs(3600)
}

fn default_stale_check_interval() -> Duration {
    Duration::from_secs(3600)
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
