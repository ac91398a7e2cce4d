//! Download chapters of a series
//!
//! This example demonstrates the full pipeline:
//! - Loading persisted settings (tokens, identity, preferences)
//! - Fetching a catalog page and picking chapters
//! - Subscribing to events
//! - Running a session with Ctrl+C cancellation
//!
//! Usage:
//!
//! ```text
//! cargo run --example download_chapter -- https://reader.example.fr/catalogue/series/ "Volume 1" "Volume 2"
//! ```
//!
//! Without labels, every chapter of the catalog is downloaded.

use chapter_dl::{
    Catalog, Config, DownloadSession, Event, HttpClient, Settings, cancel_on_shutdown,
    is_catalog_url,
};
use std::path::Path;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const SETTINGS_PATH: &str = "chapter-dl.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chapter_dl=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let mut settings = Settings::load(Path::new(SETTINGS_PATH)).await?;
    let url = args.next().unwrap_or_else(|| settings.last_url.clone());
    if !is_catalog_url(&url) {
        eprintln!("usage: download_chapter <https://host/catalogue/slug/> [labels...]");
        std::process::exit(2);
    }
    let labels: Vec<String> = args.collect();

    let mut config = Config::default();
    settings.apply_to(&mut config);
    if settings.is_stale(config.credentials.stale_after) {
        println!("stored tokens are older than the staleness window, consider renewing them");
    }
    let credentials = settings.credentials(&config, &config.http.user_agent);

    let http = HttpClient::new(&config.http)?;
    let catalog = Catalog::fetch(&http, &url, &credentials).await?;
    let chapters: Vec<_> = if labels.is_empty() {
        catalog.chapters.clone()
    } else {
        let wanted: Vec<&str> = labels.iter().map(String::as_str).collect();
        catalog.select(&wanted).cloned().collect()
    };
    println!("{}: {} chapter(s) selected", catalog.title, chapters.len());

    let (event_tx, mut events) = broadcast::channel(256);
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::ChapterStarted { chapter, .. } => println!("→ {chapter}"),
                Event::Progress {
                    chapter,
                    done,
                    total,
                } => println!("  {chapter}: {done}/{total}"),
                Event::Archived {
                    path, size_bytes, ..
                } => println!("  archived {} ({size_bytes} bytes)", path.display()),
                Event::ChapterSkipped { chapter, .. } => println!("  {chapter}: already archived"),
                Event::AssetFailed { url, error, .. } => println!("  failed {url}: {error}"),
                Event::CredentialsStale { age_secs } => {
                    println!("  tokens are {age_secs}s old, consider renewing them")
                }
                _ => {}
            }
        }
    });

    let session = DownloadSession::new(&config)?.with_events(event_tx);
    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    let report = session
        .run(&catalog.title, &chapters, credentials.clone(), &cancel)
        .await;

    settings.last_url = url;
    settings.store_credentials(&credentials);
    settings.save(Path::new(SETTINGS_PATH)).await?;

    println!(
        "done: {} job(s), {} skipped, {} unresolved{}",
        report.jobs.len(),
        report.skipped.len(),
        report.unresolved.len(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    Ok(())
}
