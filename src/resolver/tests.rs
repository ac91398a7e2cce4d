//! Tests for the asset resolver against mock page and rendering endpoints.

use super::*;
use crate::config::RetryConfig;
use crate::render::{NoRenderService, RenderClient};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAPTER_PATH: &str = "/manga/vol-1/";

fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.resolver.request_delay = Duration::ZERO;
    config.resolver.page_retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: false,
        ..RetryConfig::default()
    };
    config.render.base_url = server.uri();
    config
}

fn resolver_for(server: &MockServer) -> AssetResolver {
    let config = test_config(server);
    let http = HttpClient::new(&config.http).unwrap();
    let render = Arc::new(RenderClient::new(&config.render).unwrap());
    AssetResolver::new(&config, http, render).unwrap()
}

fn chapter(server: &MockServer) -> ChapterRef {
    ChapterRef::new("Volume 1", format!("{}{CHAPTER_PATH}", server.uri()))
}

fn creds() -> CredentialContext {
    CredentialContext::new("TestAgent/1.0").with_token(Domain::Net, "tok")
}

async fn mount_page(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(CHAPTER_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_render(server: &MockServer, document: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "solution": { "response": document }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn json_page(urls: &[&str]) -> String {
    let payload = json!({ "sources": [ { "images": urls } ] });
    format!(
        r#"<html><body><div id="readerarea"><img src="https://cdn/markup.jpg"></div>
        <script>ts_reader.run({payload});</script></body></html>"#
    )
}

#[tokio::test]
async fn structured_payload_is_authoritative() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        200,
        &json_page(&["http://cdn/1.jpg", "https://cdn/2.jpg", "https://cdn/1.jpg"]),
    )
    .await;
    mount_render(&server, "", 0).await;

    let resolution = resolver_for(&server)
        .resolve_detailed(&chapter(&server), &creds(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.tier, Some(ResolveTier::ReaderJson));
    assert!(!resolution.rendered);
    assert_eq!(
        resolution.assets.as_slice(),
        ["https://cdn/1.jpg", "https://cdn/2.jpg"],
        "scheme upgraded, duplicates dropped, markup ignored"
    );
}

#[tokio::test]
async fn markup_tier_used_without_payload() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        200,
        r#"<div id="readerarea"><img data-src="https://cdn/1.webp"><img src="https://cdn/2.webp"></div>"#,
    )
    .await;

    let resolution = resolver_for(&server)
        .resolve_detailed(&chapter(&server), &creds(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.tier, Some(ResolveTier::ReaderMarkup));
    assert_eq!(
        resolution.assets.as_slice(),
        ["https://cdn/1.webp", "https://cdn/2.webp"]
    );
}

#[tokio::test]
async fn pattern_tier_is_last_resort() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        200,
        r#"<main><img src="https://cdn/a.jpg"><p><img data-src="https://cdn/b.png"></p><img src="https://cdn/a.jpg"></main>"#,
    )
    .await;

    let assets = resolver_for(&server)
        .resolve(&chapter(&server), &creds())
        .await
        .unwrap();

    assert_eq!(assets.as_slice(), ["https://cdn/a.jpg", "https://cdn/b.png"]);
}

#[tokio::test]
async fn filtered_domain_drops_parasites_from_markup_but_not_payload() {
    let server = MockServer::start().await;
    let chapter = chapter(&server).with_domain(Domain::Fr);
    mount_page(
        &server,
        200,
        r#"<div id="readerarea"><img src="https://cdn/logo.png"><img src="https://cdn/1.jpg"></div>"#,
    )
    .await;

    let assets = resolver_for(&server)
        .resolve(&chapter, &creds())
        .await
        .unwrap();
    assert_eq!(assets.as_slice(), ["https://cdn/1.jpg"]);

    let resolver = resolver_for(&server);
    let (tier, assets) = resolver
        .extract(&json_page(&["https://cdn/logo.png"]), Domain::Fr)
        .unwrap();
    assert_eq!(tier, ResolveTier::ReaderJson);
    assert_eq!(assets.as_slice(), ["https://cdn/logo.png"]);
}

#[tokio::test]
async fn challenge_marker_goes_to_rendering_service() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        200,
        r#"<title>Just a moment...</title><img src="https://cdn/bait.jpg">"#,
    )
    .await;
    mount_render(&server, &json_page(&["https://cdn/1.jpg"]), 1).await;

    let resolution = resolver_for(&server)
        .resolve_detailed(&chapter(&server), &creds(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(resolution.rendered);
    assert_eq!(resolution.tier, Some(ResolveTier::ReaderJson));
    assert_eq!(resolution.assets.as_slice(), ["https://cdn/1.jpg"]);
    assert_eq!(resolution.challenged.as_deref(), Some("Just a moment"));
}

#[tokio::test]
async fn challenge_status_goes_to_rendering_service() {
    let server = MockServer::start().await;
    mount_page(&server, 403, &json_page(&["https://cdn/direct.jpg"])).await;
    mount_render(&server, &json_page(&["https://cdn/rendered.jpg"]), 1).await;

    let (tx, mut rx) = broadcast::channel(8);
    let resolution = resolver_for(&server)
        .with_events(tx)
        .resolve_detailed(&chapter(&server), &creds(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resolution.assets.as_slice(), ["https://cdn/rendered.jpg"]);
    assert_eq!(resolution.challenged.as_deref(), Some("HTTP 403"));
    assert!(matches!(
        rx.try_recv().unwrap(),
        Event::Resolved { rendered: true, challenged: Some(marker), .. } if marker == "HTTP 403"
    ));
}

#[tokio::test]
async fn empty_direct_page_goes_to_rendering_service() {
    let server = MockServer::start().await;
    mount_page(&server, 200, "<html><body>nothing</body></html>").await;
    mount_render(&server, &json_page(&["https://cdn/1.jpg"]), 1).await;

    let resolution = resolver_for(&server)
        .resolve_detailed(&chapter(&server), &creds(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(resolution.rendered);
    assert_eq!(resolution.assets.len(), 1);
}

#[tokio::test]
async fn nothing_anywhere_is_an_empty_list_not_an_error() {
    let server = MockServer::start().await;
    mount_page(&server, 200, "<html></html>").await;
    mount_render(&server, "<html>still nothing</html>", 1).await;

    let resolution = resolver_for(&server)
        .resolve_detailed(&chapter(&server), &creds(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(resolution.assets.is_empty());
    assert_eq!(resolution.tier, None);
}

#[tokio::test]
async fn rendering_failure_is_an_empty_list() {
    let server = MockServer::start().await;
    mount_page(&server, 503, "busy").await;

    let config = test_config(&server);
    let resolver = AssetResolver::new(
        &config,
        HttpClient::new(&config.http).unwrap(),
        Arc::new(NoRenderService),
    )
    .unwrap();

    let resolution = resolver
        .resolve_detailed(&chapter(&server), &creds(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(resolution.assets.is_empty());
    assert_eq!(resolution.tier, None);
    assert_eq!(resolution.challenged.as_deref(), Some("HTTP 503"));
}

#[tokio::test]
async fn transport_failure_is_retried_then_rendered() {
    let server = MockServer::start().await;
    mount_render(&server, &json_page(&["https://cdn/1.jpg"]), 1).await;

    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let chapter = ChapterRef::new("Volume 1", format!("http://{addr}/manga/vol-1/"));

    let resolution = resolver_for(&server)
        .resolve_detailed(&chapter, &creds(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(resolution.rendered);
    assert_eq!(resolution.assets.as_slice(), ["https://cdn/1.jpg"]);
}

#[tokio::test]
async fn invalid_chapter_url_is_a_setup_error() {
    let server = MockServer::start().await;
    let chapter = ChapterRef::new("Volume 1", "not a url");

    let err = resolver_for(&server)
        .resolve(&chapter, &creds())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
}

#[tokio::test]
async fn cancelled_resolution_returns_cancelled() {
    let server = MockServer::start().await;
    mount_page(&server, 200, &json_page(&["https://cdn/1.jpg"])).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = resolver_for(&server)
        .resolve_detailed(&chapter(&server), &creds(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn resolved_event_reports_tier() {
    let server = MockServer::start().await;
    mount_page(&server, 200, &json_page(&["https://cdn/1.jpg", "https://cdn/2.jpg"])).await;
    let (tx, mut rx) = broadcast::channel(8);

    resolver_for(&server)
        .with_events(tx)
        .resolve(&chapter(&server), &creds())
        .await
        .unwrap();

    match rx.try_recv().unwrap() {
        Event::Resolved {
            chapter,
            tier,
            rendered,
            challenged,
            assets,
        } => {
            assert_eq!(chapter, "Volume 1");
            assert_eq!(tier, ResolveTier::ReaderJson);
            assert!(!rendered);
            assert_eq!(challenged, None);
            assert_eq!(assets, 2);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn challenge_detection_by_status_and_marker() {
    let config = Config::default();
    let resolver = AssetResolver::new(
        &config,
        HttpClient::new(&config.http).unwrap(),
        Arc::new(NoRenderService),
    )
    .unwrap();

    assert_eq!(resolver.detect_challenge(429, "").as_deref(), Some("HTTP 429"));
    assert_eq!(
        resolver
            .detect_challenge(200, "<div id=\"cf-browser-verification\">")
            .as_deref(),
        Some("cf-browser-verification")
    );
    assert_eq!(resolver.detect_challenge(200, "<html>fine</html>"), None);
    assert_eq!(resolver.detect_challenge(404, "gone"), None);
}
