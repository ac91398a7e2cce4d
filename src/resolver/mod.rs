//! Chapter page → ordered asset list
//!
//! Resolution runs the direct page through an ordered chain of
//! [`ExtractionStrategy`] tiers and falls back to the rendering service when the
//! direct request is blocked or yields nothing:
//!
//! 1. direct fetch (transport failures retried under `resolver.page_retry`)
//! 2. challenge or non-200 → straight to the rendered path
//! 3. tiers in order, first non-empty result wins
//! 4. rendered document through the same tiers
//!
//! Exhausting both paths returns an empty list; that is a normal outcome.

mod strategy;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use strategy::{
    ExtractionStrategy, ParasiteFilter, RawPatternStrategy, ReaderJsonStrategy,
    ReaderMarkupStrategy, default_strategies,
};

use crate::config::Config;
use crate::credentials::CredentialContext;
use crate::error::{Error, FetchError, Result};
use crate::http::{HttpClient, PageResponse};
use crate::render::{RenderMode, RenderService};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::types::{AssetList, ChapterRef, Domain, Event, ResolveTier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Statuses interpreted as a bot-mitigation response
const CHALLENGE_STATUSES: &[u16] = &[403, 429, 503];

/// Outcome of a resolution, with provenance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Resolved assets (may be empty)
    pub assets: AssetList,
    /// Tier that produced the assets, `None` when nothing was found
    pub tier: Option<ResolveTier>,
    /// True when the assets came from the rendered document
    pub rendered: bool,
    /// Marker of the challenge that blocked the direct request, if any
    pub challenged: Option<String>,
}

impl Resolution {
    fn empty(challenged: Option<String>) -> Self {
        Self {
            assets: AssetList::default(),
            tier: None,
            rendered: false,
            challenged,
        }
    }
}

/// Tiered asset resolver with rendering fallback
pub struct AssetResolver {
    http: HttpClient,
    render: Arc<dyn RenderService>,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    filter: ParasiteFilter,
    challenge_markers: Vec<String>,
    request_delay: Duration,
    page_retry: RetryPolicy,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl AssetResolver {
    /// Create a resolver with the default tier chain
    ///
    /// # Errors
    /// Returns error if a built-in extraction pattern fails to compile
    pub fn new(config: &Config, http: HttpClient, render: Arc<dyn RenderService>) -> Result<Self> {
        Ok(Self {
            http,
            render,
            strategies: default_strategies(&config.resolver)?,
            filter: ParasiteFilter::from_config(&config.resolver),
            challenge_markers: config.resolver.challenge_markers.clone(),
            request_delay: config.resolver.request_delay,
            page_retry: RetryPolicy::new(config.resolver.page_retry.clone()),
            event_tx: None,
        })
    }

    /// Publish [`Event::Resolved`] on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Replace the tier chain
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Resolve a chapter to its ordered asset list
    ///
    /// # Errors
    /// Only for setup problems: [`Error::InvalidUrl`] when the chapter URL does not parse.
    pub async fn resolve(
        &self,
        chapter: &ChapterRef,
        credentials: &CredentialContext,
    ) -> Result<AssetList> {
        let resolution = self
            .resolve_detailed(chapter, credentials, &CancellationToken::new())
            .await?;
        Ok(resolution.assets)
    }

    /// Resolve with provenance and cooperative cancellation
    ///
    /// # Errors
    /// [`Error::InvalidUrl`] for an unparseable chapter URL, [`Error::Cancelled`] when
    /// `cancel` fires before resolution finishes.
    pub async fn resolve_detailed(
        &self,
        chapter: &ChapterRef,
        credentials: &CredentialContext,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        url::Url::parse(&chapter.source_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", chapter.source_url)))?;

        if !self.request_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.request_delay) => {}
            }
        }

        let mut challenged = None;
        if let Some(page) = self.fetch_direct(chapter, credentials, cancel).await? {
            match self.resolve_direct(chapter, &page) {
                Ok(Some(resolution)) => return Ok(self.report(chapter, resolution)),
                Ok(None) => {}
                Err(FetchError::Challenge { marker, .. }) => {
                    tracing::warn!(
                        chapter = %chapter.label,
                        marker = %marker,
                        "challenge detected, trying rendering service"
                    );
                    challenged = Some(marker);
                }
                Err(e) => {
                    tracing::warn!(chapter = %chapter.label, error = %e, "trying rendering service");
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let rendered = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            rendered = self.render.render(&chapter.source_url, RenderMode::Page) => rendered,
        };

        match rendered {
            Ok(document) => match self.extract(&document, chapter.domain) {
                Some((tier, assets)) => Ok(self.report(
                    chapter,
                    Resolution {
                        assets,
                        tier: Some(tier),
                        rendered: true,
                        challenged,
                    },
                )),
                None => {
                    tracing::warn!(chapter = %chapter.label, "no assets found after rendering");
                    Ok(Resolution::empty(challenged))
                }
            },
            Err(e) => {
                tracing::warn!(chapter = %chapter.label, error = %e, "rendering fallback failed");
                Ok(Resolution::empty(challenged))
            }
        }
    }

    /// Run the tier chain over a document; first non-empty tier wins
    ///
    /// Returns `None` when every tier comes back empty (after filtering).
    pub fn extract(&self, body: &str, domain: Domain) -> Option<(ResolveTier, AssetList)> {
        for strategy in &self.strategies {
            let mut urls = strategy.try_extract(body, domain);
            if strategy.filtered() && domain.is_filtered() {
                urls = self.filter.apply(urls);
            }
            let assets = AssetList::new(urls);
            tracing::debug!(tier = %strategy.tier(), found = assets.len(), "extraction tier tried");
            if !assets.is_empty() {
                return Some((strategy.tier(), assets));
            }
        }
        None
    }

    /// Identify a bot-mitigation response by status or body marker
    ///
    /// Returns the matched marker (or `"HTTP <status>"`).
    pub fn detect_challenge(&self, status: u16, body: &str) -> Option<String> {
        if CHALLENGE_STATUSES.contains(&status) {
            return Some(format!("HTTP {status}"));
        }
        self.challenge_markers
            .iter()
            .find(|marker| body.contains(marker.as_str()))
            .cloned()
    }

    async fn fetch_direct(
        &self,
        chapter: &ChapterRef,
        credentials: &CredentialContext,
        cancel: &CancellationToken,
    ) -> Result<Option<PageResponse>> {
        let http = &self.http;
        let url = chapter.source_url.as_str();
        let label = chapter.label.as_str();
        let domain = chapter.domain;

        let run = self
            .page_retry
            .run(cancel, move |attempt| {
                tracing::debug!(chapter = %label, attempt, "direct page request");
                http.get_page(url, credentials, domain)
            })
            .await;

        match run.outcome {
            RetryOutcome::Succeeded(page) => Ok(Some(page)),
            RetryOutcome::Cancelled => Err(Error::Cancelled),
            RetryOutcome::Exhausted | RetryOutcome::NonRetryable => {
                if let Some(e) = run.last_error() {
                    tracing::warn!(
                        chapter = %chapter.label,
                        error = %e,
                        attempts = run.attempts(),
                        "direct request failed, trying rendering service"
                    );
                }
                Ok(None)
            }
        }
    }

    /// Extract from the direct response
    ///
    /// `Ok(None)` and errors both send the chapter to the rendered path.
    fn resolve_direct(
        &self,
        chapter: &ChapterRef,
        page: &PageResponse,
    ) -> std::result::Result<Option<Resolution>, FetchError> {
        if let Some(marker) = self.detect_challenge(page.status, &page.body) {
            return Err(FetchError::Challenge {
                url: chapter.source_url.clone(),
                marker,
            });
        }
        if page.status != 200 {
            return Err(FetchError::Status {
                url: chapter.source_url.clone(),
                status: page.status,
            });
        }

        match self.extract(&page.body, chapter.domain) {
            Some((tier, assets)) => Ok(Some(Resolution {
                assets,
                tier: Some(tier),
                rendered: false,
                challenged: None,
            })),
            None => {
                tracing::info!(
                    chapter = %chapter.label,
                    "no assets in direct response, trying rendering service"
                );
                Ok(None)
            }
        }
    }

    fn report(&self, chapter: &ChapterRef, resolution: Resolution) -> Resolution {
        if let Some(tier) = resolution.tier {
            tracing::info!(
                chapter = %chapter.label,
                tier = %tier,
                rendered = resolution.rendered,
                challenged = resolution.challenged.as_deref(),
                assets = resolution.assets.len(),
                "assets resolved"
            );
            if let Some(tx) = &self.event_tx {
                // ignore send errors: no subscribers is fine
                let _ = tx.send(Event::Resolved {
                    chapter: chapter.label.clone(),
                    tier,
                    rendered: resolution.rendered,
                    challenged: resolution.challenged.clone(),
                    assets: resolution.assets.len(),
                });
            }
        }
        resolution
    }
}
