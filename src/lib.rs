//! # chapter-dl
//!
//! Resilient chapter image downloader for reader sites behind bot mitigation.
//!
//! ## Pipeline
//!
//! A chapter flows through four stages:
//! - **Resolve** - [`AssetResolver`] turns a reader page into an ordered list of image
//!   URLs, falling back to a headless rendering service when the direct request is
//!   challenged
//! - **Fetch** - [`AssetFetcher`] downloads one image with bounded retries and a single
//!   rendering-service fallback
//! - **Coordinate** - [`ChapterDownloadCoordinator`] runs a bounded worker pool per
//!   chapter and reports monotonic progress
//! - **Archive** - [`Archiver`] packages the pages into a verified `.cbz` container
//!
//! [`DownloadSession`] drives several chapters of a series in order.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chapter_dl::{ChapterRef, Config, CredentialContext, DownloadSession, Domain};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = DownloadSession::new(&Config::default())?;
//!
//!     let credentials = CredentialContext::new("Mozilla/5.0 (X11; Linux x86_64)")
//!         .with_token(Domain::Fr, "clearance-token");
//!     let chapters = [ChapterRef::new("Volume 1", "https://reader.example.fr/series-volume-1/")];
//!
//!     let cancel = CancellationToken::new();
//!     chapter_dl::cancel_on_shutdown(cancel.clone());
//!
//!     let report = session.run("Series", &chapters, credentials, &cancel).await;
//!     println!("success: {}", report.is_success());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Container writing, verification and repair
pub mod archive;
/// Series catalog pages
pub mod catalog;
/// Configuration types
pub mod config;
/// Per-chapter download coordination (decomposed into focused submodules)
pub mod coordinator;
/// Clearance tokens and staleness tracking
pub mod credentials;
/// Error types
pub mod error;
/// Single-asset acquisition with retry and fallback
pub mod fetcher;
/// HTTP transport
pub mod http;
/// Headless rendering service client
pub mod render;
/// Chapter page resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Multi-chapter sessions
pub mod session;
/// Persisted user settings
pub mod settings;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archive::Archiver;
pub use catalog::{Catalog, is_catalog_url};
pub use config::Config;
pub use coordinator::{ChapterDownloadCoordinator, DownloadJob};
pub use credentials::{CredentialContext, spawn_staleness_watcher};
pub use error::{ArchiveError, Error, FetchError, Result, TransportKind};
pub use fetcher::{AssetFetcher, AssetReport, AssetRequest};
pub use http::HttpClient;
pub use render::{NoRenderService, RenderClient, RenderMode, RenderService};
pub use resolver::{AssetResolver, Resolution};
pub use session::{CredentialPrompt, DownloadSession, NoPrompt};
pub use settings::Settings;
pub use types::{
    ArchiveResult, AssetList, ChapterRef, Domain, Event, JobReport, JobState, ResolveTier,
    SessionReport,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// Spawns a background task; every stage observes the token cooperatively.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Must be called from within a Tokio runtime.
pub fn cancel_on_shutdown(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = wait_for_signal() => {
                tracing::info!("shutdown requested, cancelling downloads");
                token.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "signal received"),
                _ = sigint.recv() => tracing::info!(signal = "SIGINT", "signal received"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "signal handler registration failed, listening on the other signal only");
            only.recv().await;
            tracing::info!("signal received");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "no signal handler could be registered, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "Ctrl+C", "signal received"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
