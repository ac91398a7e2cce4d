//! Rendering-service (headless browser proxy) client
//!
//! The service fetches a URL through a real browser and returns the response body as
//! a string. It is used as the secondary transport when direct requests are blocked.

use crate::config::RenderServiceConfig;
use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Headroom of the HTTP call over the `maxTimeout` budget given to the service
const CALL_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// What the rendered response is used for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Render a chapter page (JavaScript executed, shorter budget)
    Page,
    /// Proxy a single asset (no rendering, longer budget)
    Asset,
}

/// Secondary transport that proxies a request through a browser
///
/// # Examples
///
/// ```no_run
/// use chapter_dl::render::{RenderClient, RenderMode, RenderService};
/// use chapter_dl::config::RenderServiceConfig;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = RenderClient::new(&RenderServiceConfig::default())?;
/// let html = service
///     .render("https://reader.example.net/one-piece-volume-1/", RenderMode::Page)
///     .await?;
/// println!("{} bytes rendered", html.len());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait RenderService: Send + Sync {
    /// Fetch `url` through the service and return the response body
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Render`] when the service is unreachable, reports an
    /// error, or returns an empty response, and [`FetchError::Transport`] on timeout.
    async fn render(&self, url: &str, mode: RenderMode) -> std::result::Result<String, FetchError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    cmd: &'static str,
    url: &'a str,
    max_timeout: u64,
    render: bool,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    solution: Option<RenderSolution>,
}

#[derive(Debug, Deserialize)]
struct RenderSolution {
    #[serde(default)]
    response: Option<String>,
}

/// HTTP client for the `POST {base}/v1` rendering contract
#[derive(Clone, Debug)]
pub struct RenderClient {
    client: reqwest::Client,
    endpoint: String,
    page_timeout: Duration,
    asset_timeout: Duration,
}

impl RenderClient {
    /// Create a client for the configured service
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be built
    pub fn new(config: &RenderServiceConfig) -> Result<Self> {
        let base = url::Url::parse(&config.base_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        let endpoint = format!("{}/v1", base.as_str().trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            page_timeout: config.page_timeout,
            asset_timeout: config.asset_timeout,
        })
    }

    /// Full endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RenderService for RenderClient {
    async fn render(&self, url: &str, mode: RenderMode) -> std::result::Result<String, FetchError> {
        let (timeout, render) = match mode {
            RenderMode::Page => (self.page_timeout, true),
            RenderMode::Asset => (self.asset_timeout, false),
        };
        let body = RenderRequest {
            cmd: "request.get",
            url,
            max_timeout: timeout.as_millis() as u64,
            render,
        };

        tracing::debug!(url, endpoint = %self.endpoint, render, "submitting to rendering service");

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout + CALL_TIMEOUT_MARGIN)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::from_reqwest(url, &e)
                } else {
                    render_error(url, format!("service unreachable: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(render_error(url, format!("service returned HTTP {}", status.as_u16())));
        }

        let parsed: RenderResponse = response
            .json()
            .await
            .map_err(|e| render_error(url, format!("malformed service response: {e}")))?;

        if parsed.status.as_deref() == Some("error") {
            let message = parsed.message.unwrap_or_else(|| "unknown error".to_string());
            return Err(render_error(url, message));
        }

        match parsed.solution.and_then(|s| s.response) {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(render_error(url, "empty response")),
        }
    }
}

/// Rendering service used when the fallback transport is disabled
///
/// Every call fails with [`FetchError::Render`], so callers degrade to "no fallback".
pub struct NoRenderService;

#[async_trait]
impl RenderService for NoRenderService {
    async fn render(&self, url: &str, _mode: RenderMode) -> std::result::Result<String, FetchError> {
        Err(render_error(url, "rendering service disabled"))
    }
}

/// The configured fallback transport: [`RenderClient`] when enabled, otherwise
/// [`NoRenderService`]
///
/// # Errors
/// Returns error if the service is enabled and its base URL is invalid
pub fn service_from_config(config: &RenderServiceConfig) -> Result<Arc<dyn RenderService>> {
    if config.enabled {
        Ok(Arc::new(RenderClient::new(config)?))
    } else {
        tracing::info!("rendering service disabled, no fallback transport");
        Ok(Arc::new(NoRenderService))
    }
}

fn render_error(url: &str, reason: impl Into<String>) -> FetchError {
    FetchError::Render {
        url: url.to_string(),
        reason: reason.into(),
    }
}
