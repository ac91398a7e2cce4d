//! Extraction tiers, tried in order until one yields assets

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::types::{Domain, ResolveTier};
use crate::utils::{IMAGE_EXTENSIONS, decode_entities};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

const READER_PAYLOAD_START: &str = "ts_reader.run(";
const READER_PAYLOAD_END: &str = ");</script>";
const READER_IMAGES: &str = "div#readerarea img";
const DECORATIVE_BLOCK_CLASS: &str = "bixbox";
const IMG_TAG_PATTERN: &str =
    r#"(?i)<img[^>]+(?:src|data-src)=["'](https://[^"'>]+\.(?:webp|jpg|jpeg|jpe|png|avif|gif))["']"#;

/// One way of turning a chapter document into asset URLs
pub trait ExtractionStrategy: Send + Sync {
    /// Which tier this strategy implements
    fn tier(&self) -> ResolveTier;

    /// Whether the parasite filter applies to this tier's output
    fn filtered(&self) -> bool {
        true
    }

    /// Extract asset URLs in page order; empty when the document has nothing for this tier
    fn try_extract(&self, body: &str, domain: Domain) -> Vec<String>;
}

/// Tiers in resolution order: reader JSON, reader markup, raw pattern
pub fn default_strategies(config: &ResolverConfig) -> Result<Vec<Box<dyn ExtractionStrategy>>> {
    Ok(vec![
        Box::new(ReaderJsonStrategy::new(config.upgrade_insecure_assets)),
        Box::new(ReaderMarkupStrategy),
        Box::new(RawPatternStrategy::new()?),
    ])
}

#[derive(Debug, Deserialize)]
struct ReaderPayload {
    #[serde(default)]
    sources: Vec<ReaderSource>,
}

#[derive(Debug, Deserialize)]
struct ReaderSource {
    #[serde(default)]
    images: Vec<String>,
}

/// Structured tier: the reader script's JSON payload
///
/// Output is authoritative and is not filtered. `http://` URLs are rewritten to
/// `https://` unless the upgrade is disabled.
#[derive(Clone, Copy, Debug)]
pub struct ReaderJsonStrategy {
    upgrade_insecure: bool,
}

impl ReaderJsonStrategy {
    /// Create the tier; `upgrade_insecure` rewrites `http://` asset URLs to `https://`
    pub fn new(upgrade_insecure: bool) -> Self {
        Self { upgrade_insecure }
    }
}

impl Default for ReaderJsonStrategy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ExtractionStrategy for ReaderJsonStrategy {
    fn tier(&self) -> ResolveTier {
        ResolveTier::ReaderJson
    }

    fn filtered(&self) -> bool {
        false
    }

    fn try_extract(&self, body: &str, _domain: Domain) -> Vec<String> {
        let Some(start) = body.find(READER_PAYLOAD_START) else {
            return Vec::new();
        };
        let payload = &body[start + READER_PAYLOAD_START.len()..];
        let Some(end) = payload.find(READER_PAYLOAD_END) else {
            return Vec::new();
        };
        let json = decode_entities(&payload[..end]);

        match serde_json::from_str::<ReaderPayload>(&json) {
            Ok(parsed) => parsed
                .sources
                .into_iter()
                .next()
                .map(|source| {
                    source
                        .images
                        .into_iter()
                        .filter(|url| !url.trim().is_empty())
                        .map(|url| {
                            let url = url.trim();
                            if self.upgrade_insecure {
                                upgrade_scheme(url)
                            } else {
                                url.to_string()
                            }
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!(error = %e, "reader payload is not valid JSON");
                Vec::new()
            }
        }
    }
}

/// Markup tier: `<img>` tags inside the reader container
#[derive(Clone, Copy, Debug, Default)]
pub struct ReaderMarkupStrategy;

impl ExtractionStrategy for ReaderMarkupStrategy {
    fn tier(&self) -> ResolveTier {
        ResolveTier::ReaderMarkup
    }

    fn try_extract(&self, body: &str, domain: Domain) -> Vec<String> {
        let Ok(selector) = Selector::parse(READER_IMAGES) else {
            return Vec::new();
        };
        let document = Html::parse_document(body);

        document
            .select(&selector)
            .filter(|img| !(domain.is_filtered() && inside_decorative_block(img)))
            .filter_map(|img| {
                let attrs = img.value();
                attrs
                    .attr("data-src")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .or_else(|| attrs.attr("src").map(str::trim))
            })
            .filter(|src| !src.is_empty() && !src.starts_with("data:"))
            .filter_map(absolutize)
            .filter(|src| ends_with_image_extension(src))
            .collect()
    }
}

/// Last-resort tier: regex over the raw document for absolute image URLs
#[derive(Clone, Debug)]
pub struct RawPatternStrategy {
    pattern: Regex,
}

impl RawPatternStrategy {
    /// Compile the image-tag pattern
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(IMG_TAG_PATTERN)
            .map_err(|e| Error::Other(format!("invalid image pattern: {e}")))?;
        Ok(Self { pattern })
    }
}

impl ExtractionStrategy for RawPatternStrategy {
    fn tier(&self) -> ResolveTier {
        ResolveTier::RawPattern
    }

    fn try_extract(&self, body: &str, _domain: Domain) -> Vec<String> {
        self.pattern
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Drops decorative/advertising images on the filtered domain
#[derive(Clone, Debug)]
pub struct ParasiteFilter {
    keywords: Vec<String>,
    upload_path: String,
}

impl ParasiteFilter {
    /// Build from resolver settings
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            keywords: config
                .parasite_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            upload_path: config.parasite_path.clone(),
        }
    }

    /// Whether `url` looks like an ad, logo or other non-page image
    pub fn is_parasite(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            return true;
        }
        if self.upload_path.is_empty() {
            return false;
        }
        url::Url::parse(url).is_ok_and(|parsed| {
            Domain::from_url(url) == Domain::Fr && parsed.path().contains(&self.upload_path)
        })
    }

    /// Keep only non-parasite URLs, preserving order
    pub fn apply(&self, urls: Vec<String>) -> Vec<String> {
        let before = urls.len();
        let kept: Vec<String> = urls.into_iter().filter(|u| !self.is_parasite(u)).collect();
        let removed = before - kept.len();
        if removed > 0 {
            tracing::debug!(removed, kept = kept.len(), "parasite images filtered");
        }
        kept
    }
}

fn upgrade_scheme(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

fn absolutize(src: &str) -> Option<String> {
    if let Some(rest) = src.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    let lower = src.to_ascii_lowercase();
    (lower.starts_with("https://") || lower.starts_with("http://")).then(|| src.to_string())
}

fn ends_with_image_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext) && ext != "bmp")
}

fn inside_decorative_block(img: &ElementRef<'_>) -> bool {
    img.ancestors().filter_map(ElementRef::wrap).any(|el| {
        el.value().name() == "div"
            && el
                .value()
                .classes()
                .any(|class| class == DECORATIVE_BLOCK_CLASS)
    })
}
