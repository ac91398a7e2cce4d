//! Chapter download jobs -- worker pool, progress aggregation, state machine, archival.
//!
//! Split into focused submodules:
//! - [`context`] - Per-job shared state and report/event helpers
//! - [`orchestration`] - Top-level job lifecycle (idempotence, setup, download, finalize)
//! - [`workers`] - Bounded worker pool with launch stagger
//! - [`aggregator`] - Single task owning the completion counters
//! - [`finalization`] - Final state evaluation and archival

mod aggregator;
mod context;
mod finalization;
mod orchestration;
mod workers;


use crate::archive::Archiver;
use crate::config::Config;
use crate::credentials::CredentialContext;
use crate::error::Error;
use crate::fetcher::AssetFetcher;
use crate::types::{AssetList, ChapterRef, Event, JobReport, JobState};
use crate::utils::sanitize_name;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use context::JobContext;
use orchestration::run_job;

/// One chapter to download: its resolved assets and where the pages go
#[derive(Clone, Debug)]
pub struct DownloadJob {
    /// Series title (names the container)
    pub title: String,
    /// The chapter
    pub chapter: ChapterRef,
    /// Resolved assets, in page order
    pub assets: AssetList,
    /// Directory receiving the page files (`<series dir>/<label>`)
    pub destination_dir: PathBuf,
}

impl DownloadJob {
    /// Create a job whose pages go to `<series_dir>/<sanitized label>`
    pub fn new(
        title: impl Into<String>,
        chapter: ChapterRef,
        assets: AssetList,
        series_dir: &Path,
    ) -> Self {
        let destination_dir = series_dir.join(sanitize_name(&chapter.label));
        Self {
            title: title.into(),
            chapter,
            assets,
            destination_dir,
        }
    }

    /// Directory holding the chapter directory and its container
    pub fn series_dir(&self) -> &Path {
        self.destination_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
    }
}

/// Runs chapter jobs: parallel asset downloads, then packaging
///
/// # Examples
///
/// ```no_run
/// use chapter_dl::{
///     AssetFetcher, ChapterDownloadCoordinator, ChapterRef, Config, CredentialContext,
///     DownloadJob, HttpClient, NoRenderService,
/// };
/// use chapter_dl::types::AssetList;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default();
/// let http = HttpClient::new(&config.http)?;
/// let fetcher = AssetFetcher::new(&config, http, Arc::new(NoRenderService));
/// let coordinator = ChapterDownloadCoordinator::new(&config, fetcher);
///
/// let chapter = ChapterRef::new("Volume 1", "https://reader.example.net/one-piece-volume-1/");
/// let assets = AssetList::new(["https://cdn.example.com/1.jpg"]);
/// let job = DownloadJob::new("One Piece", chapter, assets, &config.series_dir("One Piece"));
///
/// let credentials = Arc::new(CredentialContext::new("Mozilla/5.0"));
/// let report = coordinator.run(&job, credentials, &CancellationToken::new()).await;
/// println!("{}: {}/{} pages", report.state, report.completed, report.total);
/// # Ok(())
/// # }
/// ```
pub struct ChapterDownloadCoordinator {
    config: Config,
    fetcher: AssetFetcher,
    archiver: Archiver,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl ChapterDownloadCoordinator {
    /// Create a coordinator using the worker, pacing and archive settings of `config`
    pub fn new(config: &Config, fetcher: AssetFetcher) -> Self {
        Self {
            config: config.clone(),
            fetcher,
            archiver: Archiver::new(&config.archive),
            event_tx: None,
        }
    }

    /// Publish job events on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// The archiver used for packaging (and existing-container lookups)
    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    /// Download every asset of `job` and package the result
    ///
    /// Never returns an error: setup and archival failures are reported as
    /// [`JobState::Failed`] with `error` set.
    pub async fn run(
        &self,
        job: &DownloadJob,
        credentials: Arc<CredentialContext>,
        cancel: &CancellationToken,
    ) -> JobReport {
        run_job(self.context(job, credentials, cancel)).await
    }

    /// Remove the job's partial directory, then [`run`](Self::run) it again
    ///
    /// Used after a credential refresh so that pages written with the old token do
    /// not mix with the new run.
    pub async fn rerun_clean(
        &self,
        job: &DownloadJob,
        credentials: Arc<CredentialContext>,
        cancel: &CancellationToken,
    ) -> JobReport {
        let ctx = self.context(job, credentials, cancel);
        match tokio::fs::remove_dir_all(&job.destination_dir).await {
            Ok(()) => tracing::info!(
                chapter = %job.chapter.label,
                dir = %job.destination_dir.display(),
                "removed partial chapter directory"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    chapter = %job.chapter.label,
                    error = %e,
                    "failed to remove partial chapter directory"
                );
                let mut report = ctx.report(JobState::Failed);
                report.error = Some(Error::resource(&job.destination_dir, e).to_string());
                return ctx.finish(report, JobState::Failed);
            }
        }
        run_job(ctx).await
    }

    fn context<'a>(
        &'a self,
        job: &'a DownloadJob,
        credentials: Arc<CredentialContext>,
        cancel: &CancellationToken,
    ) -> JobContext<'a> {
        JobContext {
            job,
            config: &self.config,
            fetcher: &self.fetcher,
            archiver: &self.archiver,
            credentials,
            cancel: cancel.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}
