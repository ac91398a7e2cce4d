//! Single-asset download with bounded retries and a rendering fallback
//!
//! One call handles one image:
//! - up to `retry.max_attempts` direct attempts, each validated (no HTML, optionally a
//!   recognised image signature), with class-dependent exponential backoff
//! - then exactly one rendering-service attempt
//! - the accepted payload is written as `<index>.<ext>` through a `.part` file
//!
//! Ordinary failures are recorded in the [`AssetReport`]; only a filesystem failure is
//! returned as `Err`.

mod validate;


pub use validate::{decode_render_payload, looks_like_html, sniff, validate_payload};

use crate::config::Config;
use crate::credentials::CredentialContext;
use crate::error::{FetchError, Result};
use crate::http::HttpClient;
use crate::render::{RenderMode, RenderService};
use crate::retry::{IsRetryable, RetryOutcome, RetryPolicy};
use crate::types::{AttemptOutcome, ContentKind, Domain, FetchAttempt};
use crate::utils::{extension_from_url, page_file_name, write_atomic};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Extension used when neither the URL nor the payload tells the format
const FALLBACK_EXTENSION: &str = "jpg";

/// One asset to download
#[derive(Clone, Debug)]
pub struct AssetRequest {
    /// Asset URL
    pub url: String,
    /// 0-based position in the chapter
    pub index: usize,
    /// Number of assets in the chapter (sets the padding width)
    pub total: usize,
    /// Site variant the chapter came from
    pub domain: Domain,
    /// Referer to send (the chapter's site root)
    pub referer: Option<String>,
    /// Directory receiving the page file
    pub destination_dir: PathBuf,
}

/// What happened to one asset
#[derive(Clone, Debug)]
pub struct AssetReport {
    /// Asset URL
    pub url: String,
    /// 0-based position in the chapter
    pub index: usize,
    /// Written file, on success
    pub path: Option<PathBuf>,
    /// Every attempt, direct then fallback
    pub attempts: Vec<FetchAttempt>,
    /// Stopped by cancellation (not a failure)
    pub cancelled: bool,
    /// Last error, on failure
    pub error: Option<String>,
}

impl AssetReport {
    fn new(request: &AssetRequest) -> Self {
        Self {
            url: request.url.clone(),
            index: request.index,
            path: None,
            attempts: Vec::new(),
            cancelled: false,
            error: None,
        }
    }

    /// True when a file was written
    pub fn is_success(&self) -> bool {
        self.path.is_some()
    }

    /// True when every transport failed (cancelled assets are not failures)
    pub fn is_failure(&self) -> bool {
        self.path.is_none() && !self.cancelled
    }

    /// Number of direct attempts made
    pub fn direct_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| !a.via_render).count()
    }

    /// Whether the rendering fallback was used
    pub fn used_fallback(&self) -> bool {
        self.attempts.iter().any(|a| a.via_render)
    }
}

/// Downloads single assets with retry, validation and fallback
#[derive(Clone)]
pub struct AssetFetcher {
    http: HttpClient,
    render: Arc<dyn RenderService>,
    policy: RetryPolicy,
    validate_images: bool,
}

impl AssetFetcher {
    /// Create a fetcher using the asset retry policy and validation settings
    pub fn new(config: &Config, http: HttpClient, render: Arc<dyn RenderService>) -> Self {
        Self {
            http,
            render,
            policy: RetryPolicy::new(config.retry.clone()),
            validate_images: config.download.validate_images,
        }
    }

    /// Download one asset
    ///
    /// # Errors
    /// Only [`Error::Resource`](crate::Error::Resource) when the page file cannot be
    /// written; transport and validation failures are recorded in the report.
    pub async fn fetch(
        &self,
        request: &AssetRequest,
        credentials: &CredentialContext,
        cancel: &CancellationToken,
    ) -> Result<AssetReport> {
        let mut report = AssetReport::new(request);
        let url = request.url.as_str();

        let http = &self.http;
        let referer = request.referer.as_deref();
        let domain = request.domain;
        let validate_images = self.validate_images;

        let run = self
            .policy
            .run(cancel, move |attempt| async move {
                tracing::debug!(url, attempt, "direct asset attempt");
                let bytes = http.get_asset(url, credentials, domain, referer).await?;
                let kind = validate_payload(url, &bytes, validate_images)?;
                Ok::<_, FetchError>((bytes, kind))
            })
            .await;

        for (i, error) in run.errors.iter().enumerate() {
            let outcome = if error.is_retryable() {
                AttemptOutcome::RetryableFailure {
                    reason: error.to_string(),
                }
            } else {
                AttemptOutcome::TerminalFailure {
                    reason: error.to_string(),
                }
            };
            report.attempts.push(FetchAttempt {
                url: request.url.clone(),
                attempt_number: i as u32 + 1,
                via_render: false,
                outcome,
            });
        }
        let direct_attempts = run.attempts();
        let last_direct_error = run.last_error().map(ToString::to_string);

        match run.outcome {
            RetryOutcome::Succeeded((bytes, kind)) => {
                report.attempts.push(FetchAttempt {
                    url: request.url.clone(),
                    attempt_number: direct_attempts,
                    via_render: false,
                    outcome: AttemptOutcome::Success {
                        size_bytes: bytes.len() as u64,
                        kind,
                    },
                });
                report.path = Some(self.write(request, &bytes, kind).await?);
                return Ok(report);
            }
            RetryOutcome::Cancelled => {
                tracing::debug!(url, "asset cancelled");
                report.cancelled = true;
                return Ok(report);
            }
            RetryOutcome::Exhausted | RetryOutcome::NonRetryable => {}
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        tracing::warn!(
            url,
            attempts = direct_attempts,
            error = last_direct_error.as_deref().unwrap_or("unknown"),
            "direct attempts failed, trying rendering service"
        );

        let fallback = tokio::select! {
            _ = cancel.cancelled() => {
                report.cancelled = true;
                return Ok(report);
            }
            result = self.fetch_via_render(url) => result,
        };
        let fallback_attempt = direct_attempts + 1;

        match fallback {
            Ok((bytes, kind)) => {
                report.attempts.push(FetchAttempt {
                    url: request.url.clone(),
                    attempt_number: fallback_attempt,
                    via_render: true,
                    outcome: AttemptOutcome::Success {
                        size_bytes: bytes.len() as u64,
                        kind,
                    },
                });
                tracing::info!(url, "asset recovered through rendering service");
                report.path = Some(self.write(request, &bytes, kind).await?);
            }
            Err(e) => {
                tracing::error!(url, error = %e, "asset failed on every transport");
                report.attempts.push(FetchAttempt {
                    url: request.url.clone(),
                    attempt_number: fallback_attempt,
                    via_render: true,
                    outcome: AttemptOutcome::TerminalFailure {
                        reason: e.to_string(),
                    },
                });
                report.error = Some(e.to_string());
            }
        }
        Ok(report)
    }

    async fn fetch_via_render(&self, url: &str) -> std::result::Result<(Vec<u8>, ContentKind), FetchError> {
        let text = self.render.render(url, RenderMode::Asset).await?;
        let bytes = decode_render_payload(&text);
        if bytes.is_empty() {
            return Err(FetchError::Validation {
                url: url.to_string(),
                reason: "empty fallback payload".to_string(),
            });
        }
        if looks_like_html(&bytes) {
            return Err(FetchError::Validation {
                url: url.to_string(),
                reason: "fallback returned an HTML page".to_string(),
            });
        }
        let kind = sniff(&bytes);
        Ok((bytes, kind))
    }

    async fn write(&self, request: &AssetRequest, bytes: &[u8], kind: ContentKind) -> Result<PathBuf> {
        let extension = extension_from_url(&request.url)
            .or_else(|| kind.extension().map(str::to_string))
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        let path = request
            .destination_dir
            .join(page_file_name(request.index, request.total, &extension));

        write_atomic(&path, bytes).await?;
        tracing::debug!(url = %request.url, path = %path.display(), size = bytes.len(), "page written");
        Ok(path)
    }
}
