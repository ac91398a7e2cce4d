//! Multi-chapter sessions
//!
//! A [`DownloadSession`] walks a series' chapters one at a time:
//! - chapters whose container already exists are skipped without any request
//! - chapters that resolve to nothing are deferred and retried once after the main pass
//! - a partially failed chapter asks the [`CredentialPrompt`] for a fresh token and is
//!   re-run from a clean directory for as long as tokens keep coming
//!
//! The session owns the only mutable copy of the credentials; workers see an `Arc`
//! snapshot.

use crate::config::Config;
use crate::coordinator::{ChapterDownloadCoordinator, DownloadJob};
use crate::credentials::{CredentialContext, spawn_staleness_watcher};
use crate::error::{Error, Result};
use crate::fetcher::AssetFetcher;
use crate::http::HttpClient;
use crate::render::{RenderService, service_from_config};
use crate::resolver::AssetResolver;
use crate::types::{ChapterRef, Domain, Event, JobReport, JobState, SessionReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Source of fresh clearance tokens after a chapter partially failed
///
/// Implementations typically ask a user to solve the challenge in a browser and paste
/// the new cookie value.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// A new token for `domain`, or `None` to accept the partial result
    async fn refresh(&self, domain: Domain, report: &JobReport) -> Option<String>;
}

/// Prompt that never supplies a token
pub struct NoPrompt;

#[async_trait]
impl CredentialPrompt for NoPrompt {
    async fn refresh(&self, _domain: Domain, _report: &JobReport) -> Option<String> {
        None
    }
}

/// What happened to one chapter on one pass
enum ChapterOutcome {
    /// Downloaded (whatever the final job state) or skipped
    Done,
    /// Resolved to no assets
    Deferred,
    /// Cancellation observed
    Cancelled,
}

/// The session's credentials plus the issuance time published to the staleness watcher
struct SessionCredentials {
    current: Arc<CredentialContext>,
    issued_tx: watch::Sender<DateTime<Utc>>,
}

impl SessionCredentials {
    fn new(credentials: CredentialContext) -> Self {
        let (issued_tx, _) = watch::channel(credentials.issued_at());
        Self {
            current: Arc::new(credentials),
            issued_tx,
        }
    }

    fn snapshot(&self) -> Arc<CredentialContext> {
        Arc::clone(&self.current)
    }

    fn issued_at(&self) -> watch::Receiver<DateTime<Utc>> {
        self.issued_tx.subscribe()
    }

    /// Install a fresh token; running jobs keep their snapshot
    fn refresh(&mut self, domain: Domain, token: String) {
        let credentials = Arc::make_mut(&mut self.current);
        credentials.set_token(domain, token);
        self.issued_tx.send_replace(credentials.issued_at());
    }
}

/// Sequential driver over the chapters of one series
pub struct DownloadSession {
    config: Config,
    resolver: AssetResolver,
    coordinator: ChapterDownloadCoordinator,
    prompt: Arc<dyn CredentialPrompt>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl DownloadSession {
    /// Build a session with the rendering service selected by `config.render`
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or a client cannot be built
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_render_service(config, service_from_config(&config.render)?)
    }

    /// Build a session around an explicit rendering service
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or a client cannot be built
    pub fn with_render_service(config: &Config, render: Arc<dyn RenderService>) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::new(&config.http)?;
        let resolver = AssetResolver::new(config, http.clone(), Arc::clone(&render))?;
        let fetcher = AssetFetcher::new(config, http, render);
        let coordinator = ChapterDownloadCoordinator::new(config, fetcher);

        Ok(Self {
            config: config.clone(),
            resolver,
            coordinator,
            prompt: Arc::new(NoPrompt),
            event_tx: None,
        })
    }

    /// Publish session, resolver and job events on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.resolver = self.resolver.with_events(event_tx.clone());
        self.coordinator = self.coordinator.with_events(event_tx.clone());
        self.event_tx = Some(event_tx);
        self
    }

    /// Ask this prompt for fresh tokens after partial failures
    pub fn with_prompt(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Download `chapters` of the series `title` in order
    pub async fn run(
        &self,
        title: &str,
        chapters: &[ChapterRef],
        credentials: CredentialContext,
        cancel: &CancellationToken,
    ) -> SessionReport {
        let series_dir = self.config.series_dir(title);
        let mut credentials = SessionCredentials::new(credentials);
        let mut report = SessionReport::default();

        let watcher_cancel = cancel.child_token();
        let watcher = self.event_tx.clone().map(|tx| {
            spawn_staleness_watcher(
                credentials.issued_at(),
                self.config.credentials.stale_after,
                self.config.credentials.check_interval,
                tx,
                watcher_cancel.clone(),
            )
        });

        tracing::info!(title, chapters = chapters.len(), dir = %series_dir.display(), "session started");

        let mut deferred = Vec::new();
        let mut pause = false;
        for chapter in chapters {
            if !self.pace(&mut pause, cancel).await {
                report.cancelled = true;
                break;
            }
            match self
                .process(title, chapter, &series_dir, &mut credentials, cancel, &mut report, &mut pause)
                .await
            {
                ChapterOutcome::Done => {}
                ChapterOutcome::Deferred => {
                    tracing::info!(chapter = %chapter.label, "no assets resolved, retrying after the main pass");
                    self.emit(Event::ResolveDeferred {
                        chapter: chapter.label.clone(),
                    });
                    deferred.push(chapter.clone());
                }
                ChapterOutcome::Cancelled => {
                    report.cancelled = true;
                    break;
                }
            }
        }

        if !report.cancelled && !deferred.is_empty() {
            tracing::info!(count = deferred.len(), "retrying deferred chapters");
            for chapter in &deferred {
                if !self.pace(&mut pause, cancel).await {
                    report.cancelled = true;
                    break;
                }
                match self
                    .process(title, chapter, &series_dir, &mut credentials, cancel, &mut report, &mut pause)
                    .await
                {
                    ChapterOutcome::Done => {}
                    ChapterOutcome::Deferred => {
                        tracing::warn!(chapter = %chapter.label, "chapter still unresolved");
                        self.emit(Event::Unresolved {
                            chapter: chapter.label.clone(),
                        });
                        report.unresolved.push(chapter.clone());
                    }
                    ChapterOutcome::Cancelled => {
                        report.cancelled = true;
                        break;
                    }
                }
            }
        }

        watcher_cancel.cancel();
        if let Some(watcher) = watcher
            && let Err(e) = watcher.await
        {
            tracing::warn!(error = %e, "credential watcher panicked");
        }

        self.finish(&report);
        report
    }

    /// Wait `chapter_delay` before a networked chapter; false when cancelled
    async fn pace(&self, pause: &mut bool, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let delay = self.config.download.chapter_delay;
        if *pause && !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        *pause = false;
        true
    }

    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        title: &str,
        chapter: &ChapterRef,
        series_dir: &Path,
        credentials: &mut SessionCredentials,
        cancel: &CancellationToken,
        report: &mut SessionReport,
        pause: &mut bool,
    ) -> ChapterOutcome {
        if let Some(existing) =
            self.coordinator
                .archiver()
                .find_existing(series_dir, title, &chapter.label)
        {
            tracing::info!(chapter = %chapter.label, path = %existing.path.display(), "already archived, skipping");
            self.emit(Event::ChapterSkipped {
                chapter: chapter.label.clone(),
                archive: existing.path,
            });
            report.skipped.push(chapter.clone());
            return ChapterOutcome::Done;
        }

        self.emit(Event::ChapterStarted {
            chapter: chapter.label.clone(),
            url: chapter.source_url.clone(),
        });
        *pause = true;

        let resolution = match self
            .resolver
            .resolve_detailed(chapter, &credentials.current, cancel)
            .await
        {
            Ok(resolution) => resolution,
            Err(Error::Cancelled) => return ChapterOutcome::Cancelled,
            Err(e) => {
                tracing::error!(chapter = %chapter.label, error = %e, "chapter cannot be resolved");
                return ChapterOutcome::Deferred;
            }
        };
        if resolution.assets.is_empty() {
            return ChapterOutcome::Deferred;
        }

        let job = DownloadJob::new(title, chapter.clone(), resolution.assets, series_dir);
        let mut job_report = self
            .coordinator
            .run(&job, credentials.snapshot(), cancel)
            .await;

        while job_report.state == JobState::PartiallyFailed && !cancel.is_cancelled() {
            let Some(token) = self.prompt.refresh(chapter.domain, &job_report).await else {
                break;
            };
            tracing::info!(
                chapter = %chapter.label,
                domain = %chapter.domain,
                missing = job_report.failed_urls.len(),
                "fresh token supplied, re-running chapter"
            );
            credentials.refresh(chapter.domain, token);
            job_report = self
                .coordinator
                .rerun_clean(&job, credentials.snapshot(), cancel)
                .await;
        }

        let cancelled = job_report.state == JobState::Cancelled;
        report.jobs.push(job_report);
        if cancelled {
            ChapterOutcome::Cancelled
        } else {
            ChapterOutcome::Done
        }
    }

    fn finish(&self, report: &SessionReport) {
        let completed = report.count(JobState::Completed);
        let partially_failed = report.count(JobState::PartiallyFailed);
        let failed = report.count(JobState::Failed);

        tracing::info!(
            completed,
            partially_failed,
            failed,
            skipped = report.skipped.len(),
            unresolved = report.unresolved.len(),
            cancelled = report.cancelled,
            "session finished"
        );
        self.emit(Event::SessionFinished {
            completed,
            partially_failed,
            failed,
            skipped: report.skipped.len(),
            unresolved: report.unresolved.len(),
            cancelled: report.cancelled,
        });
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // ignore send errors: no subscribers is fine
            tx.send(event).ok();
        }
    }
}
