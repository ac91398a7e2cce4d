//! Per-job shared state -- collaborators, cancellation, and report/event helpers.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::archive::Archiver;
use crate::config::Config;
use crate::credentials::CredentialContext;
use crate::fetcher::AssetFetcher;
use crate::types::{Event, JobReport, JobState};

use super::DownloadJob;

/// Everything one job run needs, borrowed from the coordinator
pub(super) struct JobContext<'a> {
    pub(super) job: &'a DownloadJob,
    pub(super) config: &'a Config,
    pub(super) fetcher: &'a AssetFetcher,
    pub(super) archiver: &'a Archiver,
    pub(super) credentials: Arc<CredentialContext>,
    pub(super) cancel: CancellationToken,
    pub(super) event_tx: Option<broadcast::Sender<Event>>,
}

impl JobContext<'_> {
    pub(super) fn label(&self) -> &str {
        &self.job.chapter.label
    }

    pub(super) fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // ignore send errors: no subscribers is fine
            tx.send(event).ok();
        }
    }

    pub(super) fn set_state(&self, state: JobState) {
        tracing::info!(chapter = %self.label(), state = %state, "job state changed");
        self.emit(Event::JobStateChanged {
            chapter: self.label().to_string(),
            state,
        });
    }

    /// Empty report for this job in `state`
    pub(super) fn report(&self, state: JobState) -> JobReport {
        JobReport {
            chapter: self.job.chapter.clone(),
            state,
            total: self.job.assets.len(),
            completed: 0,
            failed_urls: BTreeSet::new(),
            destination: self.job.destination_dir.clone(),
            archive: None,
            already_archived: false,
            error: None,
        }
    }

    /// Move `report` into its final `state` and announce it
    pub(super) fn finish(&self, mut report: JobReport, state: JobState) -> JobReport {
        report.state = state;
        self.set_state(state);
        report
    }
}
