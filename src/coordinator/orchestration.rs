//! Job orchestration -- top-level lifecycle for a single chapter.

use crate::error::Error;
use crate::types::{JobReport, JobState};

use super::context::JobContext;
use super::finalization::finalize_job;
use super::workers::download_assets;

/// Core job -- orchestrates the full lifecycle of one chapter.
///
/// Phases:
/// 1. Skip when a verified container already exists (no network)
/// 2. Refuse an empty asset list or an already cancelled token
/// 3. Create the destination directory (`Pending → Running`)
/// 4. Download all assets through the worker pool
/// 5. Evaluate results, archive, report
pub(super) async fn run_job(ctx: JobContext<'_>) -> JobReport {
    let job = ctx.job;

    // Phase 1: idempotence
    if let Some(existing) =
        ctx.archiver
            .find_existing(job.series_dir(), &job.title, &job.chapter.label)
    {
        tracing::info!(
            chapter = %ctx.label(),
            path = %existing.path.display(),
            "container already exists, nothing to download"
        );
        let mut report = ctx.report(JobState::Completed);
        report.already_archived = true;
        report.archive = Some(existing);
        return ctx.finish(report, JobState::Completed);
    }

    // Phase 2: nothing to do
    if job.assets.is_empty() {
        tracing::warn!(chapter = %ctx.label(), "no assets to download");
        let mut report = ctx.report(JobState::Failed);
        report.error = Some("no assets to download".to_string());
        return ctx.finish(report, JobState::Failed);
    }
    if ctx.cancel.is_cancelled() {
        return ctx.finish(ctx.report(JobState::Cancelled), JobState::Cancelled);
    }

    // Phase 3: destination directory
    if let Err(e) = tokio::fs::create_dir_all(&job.destination_dir).await {
        let error = Error::resource(&job.destination_dir, e);
        tracing::error!(chapter = %ctx.label(), error = %error, "failed to create destination directory");
        let mut report = ctx.report(JobState::Failed);
        report.error = Some(error.to_string());
        return ctx.finish(report, JobState::Failed);
    }
    ctx.set_state(JobState::Running);

    // Phase 4: download
    let tally = download_assets(&ctx).await;

    // Phase 5: finalize
    finalize_job(&ctx, tally).await
}
