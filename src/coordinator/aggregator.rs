//! Completion aggregator -- the only owner of a job's counters and failure set.
//!
//! Workers send one [`Completion`] per asset over an `mpsc` channel; the aggregator
//! task folds them into a [`Tally`] and emits monotonic progress events. The tally is
//! returned through the task handle once every sender is dropped.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::types::Event;

/// Buffer of the worker → aggregator channel
pub(super) const COMPLETION_CHANNEL_BUFFER: usize = 64;

/// How one asset task ended
#[derive(Debug)]
pub(super) enum Completion {
    /// Page file written
    Written { index: usize, path: PathBuf },
    /// Every transport failed
    Failed {
        index: usize,
        url: String,
        error: String,
    },
    /// The page file could not be written
    ResourceFailed {
        index: usize,
        url: String,
        error: String,
    },
    /// Stopped by cancellation
    Cancelled { index: usize },
}

/// Aggregated outcome of a job's asset tasks
#[derive(Debug, Default)]
pub(super) struct Tally {
    pub(super) completed: usize,
    pub(super) failed_urls: BTreeSet<String>,
    pub(super) cancelled: usize,
    /// First filesystem error, which fails the whole job
    pub(super) resource_error: Option<String>,
}

pub(super) fn spawn_aggregator(
    chapter: String,
    total: usize,
    mut rx: mpsc::Receiver<Completion>,
    event_tx: Option<broadcast::Sender<Event>>,
) -> JoinHandle<Tally> {
    tokio::spawn(async move {
        let mut tally = Tally::default();
        let mut done = 0;
        let emit = |event: Event| {
            if let Some(tx) = &event_tx {
                tx.send(event).ok();
            }
        };

        while let Some(completion) = rx.recv().await {
            match completion {
                Completion::Written { index, path } => {
                    tracing::debug!(chapter = %chapter, index, path = %path.display(), "page done");
                    tally.completed += 1;
                }
                Completion::Failed { index, url, error } => {
                    tracing::warn!(chapter = %chapter, index, url = %url, error = %error, "page failed");
                    emit(Event::AssetFailed {
                        chapter: chapter.clone(),
                        url: url.clone(),
                        error,
                    });
                    tally.failed_urls.insert(url);
                }
                Completion::ResourceFailed { index, url, error } => {
                    tracing::error!(chapter = %chapter, index, url = %url, error = %error, "page could not be written");
                    emit(Event::AssetFailed {
                        chapter: chapter.clone(),
                        url: url.clone(),
                        error: error.clone(),
                    });
                    tally.failed_urls.insert(url);
                    tally.resource_error.get_or_insert(error);
                }
                Completion::Cancelled { index } => {
                    tracing::debug!(chapter = %chapter, index, "page cancelled");
                    tally.cancelled += 1;
                    continue;
                }
            }

            done += 1;
            emit(Event::Progress {
                chapter: chapter.clone(),
                done,
                total,
            });
        }

        tally
    })
}
