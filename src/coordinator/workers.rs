//! Bounded worker pool -- one task per asset, launched with a stagger.

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::fetcher::AssetRequest;

use super::aggregator::{COMPLETION_CHANNEL_BUFFER, Completion, Tally, spawn_aggregator};
use super::context::JobContext;

/// Download every asset of the job through a pool of `download.workers` tasks.
///
/// File names follow list position, never completion order. Cancellation stops new
/// launches; tasks already queued return immediately.
pub(super) async fn download_assets(ctx: &JobContext<'_>) -> Tally {
    let job = ctx.job;
    let total = job.assets.len();
    let workers = ctx.config.download.workers.max(1);
    let stagger = ctx.config.download.task_stagger;
    let referer = job.chapter.site_root();

    let (tx, rx) = mpsc::channel::<Completion>(COMPLETION_CHANNEL_BUFFER);
    let aggregator = spawn_aggregator(ctx.label().to_string(), total, rx, ctx.event_tx.clone());

    tracing::info!(chapter = %ctx.label(), total, workers, "downloading pages");

    let requests = job.assets.iter().enumerate().map(|(index, url)| AssetRequest {
        url: url.clone(),
        index,
        total,
        domain: job.chapter.domain,
        referer: referer.clone(),
        destination_dir: job.destination_dir.clone(),
    });

    stream::iter(requests)
        .enumerate()
        .then(|(position, request)| {
            let cancel = ctx.cancel.clone();
            async move {
                if position > 0 && !stagger.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(stagger) => {}
                    }
                }
                request
            }
        })
        .map(|request| {
            let tx = tx.clone();
            async move {
                let completion = fetch_one(ctx, request).await;
                // the aggregator only stops once every sender is dropped
                tx.send(completion).await.ok();
            }
        })
        .buffer_unordered(workers)
        .collect::<Vec<()>>()
        .await;

    drop(tx);
    match aggregator.await {
        Ok(tally) => tally,
        Err(e) => {
            tracing::error!(chapter = %ctx.label(), error = %e, "progress aggregator panicked");
            Tally {
                resource_error: Some(format!("progress aggregator panicked: {e}")),
                ..Tally::default()
            }
        }
    }
}

async fn fetch_one(ctx: &JobContext<'_>, request: AssetRequest) -> Completion {
    let index = request.index;
    if ctx.cancel.is_cancelled() {
        return Completion::Cancelled { index };
    }

    match ctx.fetcher.fetch(&request, &ctx.credentials, &ctx.cancel).await {
        Ok(report) => match report.path {
            Some(path) => Completion::Written { index, path },
            None if report.cancelled => Completion::Cancelled { index },
            None => Completion::Failed {
                index,
                url: report.url,
                error: report
                    .error
                    .unwrap_or_else(|| "no transport succeeded".to_string()),
            },
        },
        Err(e) => Completion::ResourceFailed {
            index,
            url: request.url,
            error: e.to_string(),
        },
    }
}
