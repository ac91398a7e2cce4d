//! Job finalization -- evaluate the tally, pick the final state, archive on success.

use crate::types::{Event, JobReport, JobState};

use super::aggregator::Tally;
use super::context::JobContext;

/// Turn the aggregated task outcomes into the job's final report.
///
/// Order of precedence: cancellation, filesystem failure, missing pages, then
/// archival (when enabled). Only a fully successful, non-cancelled job is archived.
pub(super) async fn finalize_job(ctx: &JobContext<'_>, tally: Tally) -> JobReport {
    let Tally {
        completed,
        failed_urls,
        cancelled,
        resource_error,
    } = tally;

    let mut report = ctx.report(JobState::Running);
    report.completed = completed;
    report.failed_urls = failed_urls;

    if ctx.cancel.is_cancelled() {
        tracing::warn!(
            chapter = %ctx.label(),
            completed,
            cancelled,
            total = report.total,
            "job cancelled, no archive"
        );
        return ctx.finish(report, JobState::Cancelled);
    }

    if let Some(error) = resource_error {
        tracing::error!(chapter = %ctx.label(), error = %error, "job failed, pages could not be written");
        report.error = Some(error);
        return ctx.finish(report, JobState::Failed);
    }

    if !report.failed_urls.is_empty() {
        tracing::warn!(
            chapter = %ctx.label(),
            failed = report.failed_urls.len(),
            completed,
            total = report.total,
            dir = %ctx.job.destination_dir.display(),
            "job completed with missing pages, directory kept"
        );
        return ctx.finish(report, JobState::PartiallyFailed);
    }

    if !ctx.config.archive.enabled {
        tracing::info!(chapter = %ctx.label(), completed, "job completed, archiving disabled");
        return ctx.finish(report, JobState::Completed);
    }

    let job = ctx.job;
    match ctx
        .archiver
        .archive(&job.destination_dir, &job.title, &job.chapter.label)
        .await
    {
        Ok(archive) => {
            ctx.emit(Event::Archived {
                chapter: ctx.label().to_string(),
                path: archive.path.clone(),
                size_bytes: archive.size_bytes,
            });
            report.archive = Some(archive);
            ctx.finish(report, JobState::Completed)
        }
        Err(e) => {
            tracing::error!(chapter = %ctx.label(), error = %e, "archival failed, pages kept");
            ctx.emit(Event::ArchiveFailed {
                chapter: ctx.label().to_string(),
                error: e.to_string(),
            });
            report.error = Some(e.to_string());
            ctx.finish(report, JobState::Failed)
        }
    }
}
