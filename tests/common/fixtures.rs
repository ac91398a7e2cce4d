//! Mock reader site and test configuration

use chapter_dl::Config;
use chapter_dl::config::RetryConfig;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// User-Agent used by every test credential context
pub const TEST_IDENTITY: &str = "TestAgent/1.0";

/// A JPEG-signed payload of roughly `size` bytes; `seed` makes pages distinguishable
pub fn jpeg(seed: u8, size: usize) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.extend(std::iter::repeat_n(seed, size.saturating_sub(4)));
    bytes
}

/// A PNG-signed payload
pub fn png(seed: u8, size: usize) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend(std::iter::repeat_n(seed, size.saturating_sub(8)));
    bytes
}

/// Configuration with no pacing, fast retries and the rendering service disabled
pub fn fast_config(root: &Path) -> Config {
    let fast = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: false,
        ..RetryConfig::default()
    };
    let mut config = Config::default();
    config.download.root_dir = root.to_path_buf();
    config.download.workers = 3;
    config.download.task_stagger = Duration::ZERO;
    config.download.chapter_delay = Duration::ZERO;
    config.resolver.request_delay = Duration::ZERO;
    config.resolver.page_retry = fast.clone();
    // mock servers only speak plain HTTP
    config.resolver.upgrade_insecure_assets = false;
    config.retry = fast;
    config.render.enabled = false;
    config.archive.min_size_bytes = 100;
    config
}

/// Reader page embedding the image list as a reader JSON payload
pub fn reader_json_page(image_urls: &[String]) -> String {
    let payload = json!({ "sources": [ { "source": "s1", "images": image_urls } ] });
    format!("<html><body><div id=\"readerarea\"></div><script>ts_reader.run({payload});</script></body></html>")
}

/// Reader page listing the images as `<img>` tags in the reader container
pub fn reader_markup_page(image_urls: &[String]) -> String {
    let imgs: String = image_urls
        .iter()
        .map(|u| format!("<img src=\"{u}\" />"))
        .collect();
    format!("<html><body><div id=\"readerarea\">{imgs}</div></body></html>")
}

/// One chapter served by a [`MockSite`]
pub struct MockChapter {
    /// Chapter label as shown in the catalog
    pub label: &'static str,
    /// Path slug of the reader page
    pub slug: &'static str,
    /// Number of images
    pub pages: usize,
}

/// A reader site on a local mock server
pub struct MockSite {
    /// The server
    pub server: MockServer,
}

impl MockSite {
    /// Start an empty site
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Site root URL
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Image URLs of a chapter
    pub fn image_urls(&self, chapter: &MockChapter) -> Vec<String> {
        (1..=chapter.pages)
            .map(|n| format!("{}/img/{}/{n:03}.jpg", self.uri(), chapter.slug))
            .collect()
    }

    /// Reader page URL of a chapter
    pub fn chapter_url(&self, chapter: &MockChapter) -> String {
        format!("{}/{}/", self.uri(), chapter.slug)
    }

    /// Catalog page URL of the series
    pub fn catalog_url(&self) -> String {
        format!("{}/catalogue/series/", self.uri())
    }

    /// Mount the catalog page (newest chapter first, as sites list them)
    pub async fn mount_catalog(&self, title: &str, chapters: &[MockChapter]) {
        let links: String = chapters
            .iter()
            .rev()
            .map(|c| {
                format!(
                    "<li><a href=\"{}\"><span class=\"chapternum\">{}</span></a></li>",
                    self.chapter_url(c),
                    c.label
                )
            })
            .collect();
        let body = format!(
            "<html><body><h1 class=\"entry-title\" itemprop=\"name\">{title}</h1><ul>{links}</ul></body></html>"
        );
        Mock::given(method("GET"))
            .and(path("/catalogue/series/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Mount a chapter's reader page and all of its images
    pub async fn mount_chapter(&self, chapter: &MockChapter) {
        let urls = self.image_urls(chapter);
        Mock::given(method("GET"))
            .and(path(format!("/{}/", chapter.slug)))
            .respond_with(ResponseTemplate::new(200).set_body_string(reader_json_page(&urls)))
            .mount(&self.server)
            .await;
        for n in 1..=chapter.pages {
            self.mount_image(chapter, n, ResponseTemplate::new(200).set_body_bytes(jpeg(n as u8, 2048)))
                .await;
        }
    }

    /// Mount one image response (1-based page number)
    pub async fn mount_image(&self, chapter: &MockChapter, page: usize, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(format!("/img/{}/{page:03}.jpg", chapter.slug)))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Number of image requests received so far
    pub async fn image_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().starts_with("/img/"))
            .count()
    }
}
