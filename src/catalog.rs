//! Series catalog pages
//!
//! A catalog page lists every chapter of a series, newest first. [`Catalog::parse`]
//! turns it into the series title and the chapters in reading order.

use crate::credentials::CredentialContext;
use crate::error::{Error, FetchError, Result};
use crate::http::HttpClient;
use crate::types::{ChapterRef, Domain};
use scraper::{Html, Selector};
use std::collections::HashSet;

const TITLE_SELECTOR: &str = "h1.entry-title";
const LINK_SELECTOR: &str = "a[href]";
const LABEL_SELECTOR: &str = "span.chapternum";
const CATALOG_SEGMENT: &str = "catalogue";

/// Title and chapters of one series
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Catalog {
    /// Series title
    pub title: String,
    /// Chapters in ascending order
    pub chapters: Vec<ChapterRef>,
}

impl Catalog {
    /// Parse a catalog page
    ///
    /// # Errors
    /// [`Error::Other`] when the page has no series title.
    pub fn parse(html: &str) -> Result<Self> {
        let document = Html::parse_document(html);
        let title_selector = selector(TITLE_SELECTOR)?;
        let link_selector = selector(LINK_SELECTOR)?;
        let label_selector = selector(LABEL_SELECTOR)?;

        let title = document
            .select(&title_selector)
            .next()
            .map(|h1| collapse_whitespace(&h1.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Other("catalog page has no series title".to_string()))?;

        let mut seen = HashSet::new();
        let mut chapters: Vec<ChapterRef> = document
            .select(&link_selector)
            .filter_map(|link| {
                let label = link.select(&label_selector).next()?;
                let href = link.value().attr("href")?.trim();
                if !href.starts_with("http://") && !href.starts_with("https://") {
                    return None;
                }
                let label = collapse_whitespace(&label.text().collect::<String>());
                Some(ChapterRef::new(label, href))
            })
            .filter(|chapter| seen.insert(chapter.source_url.clone()))
            .collect();

        // listed newest first
        chapters.reverse();

        tracing::debug!(title = %title, chapters = chapters.len(), "catalog parsed");
        Ok(Self { title, chapters })
    }

    /// Fetch and parse a catalog page
    ///
    /// # Errors
    /// [`Error::Fetch`] for transport failures and non-200 answers, plus the errors of
    /// [`Catalog::parse`].
    pub async fn fetch(
        client: &HttpClient,
        url: &str,
        credentials: &CredentialContext,
    ) -> Result<Self> {
        let page = client
            .get_page(url, credentials, Domain::from_url(url))
            .await?;
        if page.status != 200 {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: page.status,
            }
            .into());
        }
        let catalog = Self::parse(&page.body)?;
        tracing::info!(title = %catalog.title, chapters = catalog.chapters.len(), url, "catalog loaded");
        Ok(catalog)
    }

    /// Chapters with the given labels, in catalog order
    pub fn select<'a>(&'a self, labels: &'a [&str]) -> impl Iterator<Item = &'a ChapterRef> + 'a {
        self.chapters
            .iter()
            .filter(move |c| labels.contains(&c.label.as_str()))
    }
}

/// Whether `url` has the `https://<host>/catalogue/<slug>/` shape
///
/// The slug is lowercase ASCII letters, digits and dashes.
pub fn is_catalog_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    if parsed.scheme() != "https" || parsed.host_str().is_none() {
        return false;
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return false;
    }
    let Some(segments) = parsed.path_segments() else {
        return false;
    };
    let segments: Vec<&str> = segments.collect();
    match segments.as_slice() {
        [CATALOG_SEGMENT, slug, ""] => {
            !slug.is_empty()
                && slug
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        }
        _ => false,
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Other(format!("invalid selector {css}: {e}")))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"
        <html><body>
        <h1 class="entry-title" itemprop="name">Tom &amp; Jerry: The   Return</h1>
        <ul>
          <li><a href="https://reader.example.fr/tj-volume-3/"><span class="chapternum">Volume 3</span></a></li>
          <li><a href="https://reader.example.fr/tj-volume-2/">
                <span class="chapternum"> Volume 2 </span></a></li>
          <li><a href="https://reader.example.fr/tj-volume-3/"><span class="chapternum">Volume 3</span></a></li>
          <li><a href="https://reader.example.net/tj-volume-1/"><span class="chapternum">Volume 1</span></a></li>
          <li><a href="/relative/"><span class="chapternum">Bonus</span></a></li>
          <li><a href="https://reader.example.fr/about/">About</a></li>
        </ul>
        </body></html>
    "#;

    #[test]
    fn parse_title_and_ordered_chapters() {
        let catalog = Catalog::parse(PAGE).unwrap();
        assert_eq!(catalog.title, "Tom & Jerry: The Return");

        let labels: Vec<&str> = catalog.chapters.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["Volume 1", "Volume 2", "Volume 3"]);
        assert_eq!(catalog.chapters[0].domain, Domain::Net);
        assert_eq!(catalog.chapters[1].domain, Domain::Fr);
        assert_eq!(
            catalog.chapters[2].source_url,
            "https://reader.example.fr/tj-volume-3/"
        );
    }

    #[test]
    fn missing_title_is_an_error() {
        let html = r#"<a href="https://x.net/a/"><span class="chapternum">1</span></a>"#;
        assert!(matches!(Catalog::parse(html), Err(Error::Other(_))));
    }

    #[test]
    fn page_without_chapters_parses_empty() {
        let catalog = Catalog::parse(r#"<h1 class="entry-title">Solo</h1>"#).unwrap();
        assert_eq!(catalog.title, "Solo");
        assert!(catalog.chapters.is_empty());
    }

    #[test]
    fn select_keeps_catalog_order() {
        let catalog = Catalog::parse(PAGE).unwrap();
        let picked: Vec<&str> = catalog
            .select(&["Volume 3", "Volume 1", "Volume 9"])
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(picked, ["Volume 1", "Volume 3"]);
    }

    #[test]
    fn catalog_url_shape() {
        assert!(is_catalog_url("https://reader.example.fr/catalogue/one-piece/"));
        assert!(is_catalog_url("https://reader.example.net/catalogue/vol2-x9/"));
        assert!(!is_catalog_url("http://reader.example.fr/catalogue/one-piece/"));
        assert!(!is_catalog_url("https://reader.example.fr/catalogue/one-piece"));
        assert!(!is_catalog_url("https://reader.example.fr/catalogue/One-Piece/"));
        assert!(!is_catalog_url("https://reader.example.fr/catalogue//"));
        assert!(!is_catalog_url("https://reader.example.fr/one-piece-volume-1/"));
        assert!(!is_catalog_url("https://reader.example.fr/catalogue/a/b/"));
        assert!(!is_catalog_url("not a url"));
    }

    #[tokio::test]
    async fn fetch_parses_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/catalogue/tj/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let client = HttpClient::new(&HttpConfig::default()).unwrap();
        let creds = CredentialContext::new("TestAgent/1.0");
        let url = format!("{}/catalogue/tj/", server.uri());
        let catalog = Catalog::fetch(&client, &url, &creds).await.unwrap();
        assert_eq!(catalog.chapters.len(), 3);
    }

    #[tokio::test]
    async fn fetch_rejects_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&HttpConfig::default()).unwrap();
        let creds = CredentialContext::new("TestAgent/1.0");
        let url = format!("{}/catalogue/tj/", server.uri());
        match Catalog::fetch(&client, &url, &creds).await {
            Err(Error::Fetch(FetchError::Status { status, .. })) => assert_eq!(status, 403),
            other => panic!("expected status error, got {other:?}"),
        }
    }
}
