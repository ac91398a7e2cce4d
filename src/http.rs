//! Authenticated HTTP transport for chapter pages and image assets

use crate::config::HttpConfig;
use crate::credentials::CredentialContext;
use crate::error::{Error, FetchError, Result};
use crate::types::Domain;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, REFERER, USER_AGENT};
use std::time::Duration;

const PAGE_ACCEPT: &str = "*/*";
const ASSET_ACCEPT: &str = "image/avif,image/webp,image/jpeg,image/png,*/*;q=0.8";

/// A fetched page; any status is returned, the caller decides what it means
#[derive(Clone, Debug)]
pub struct PageResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded body text
    pub body: String,
}

/// Shared `reqwest` client carrying the browser-consistent header set
///
/// Cloning is cheap; the connection pool is shared.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpClient {
    /// Create a client with gzip/brotli/deflate decoding enabled
    ///
    /// # Errors
    /// Returns error if the underlying client cannot be built (TLS backend failure)
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Transport settings in use
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn identity<'a>(&'a self, credentials: &'a CredentialContext) -> &'a str {
        let identity = credentials.identity().trim();
        if identity.is_empty() {
            &self.config.user_agent
        } else {
            identity
        }
    }

    fn authenticated(
        &self,
        url: &str,
        credentials: &CredentialContext,
        domain: Domain,
        accept: &str,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .get(url)
            .timeout(timeout)
            .header(ACCEPT, accept)
            .header(ACCEPT_LANGUAGE, &self.config.accept_language)
            .header(USER_AGENT, self.identity(credentials));
        if let Some(cookie) = credentials.cookie_header(domain) {
            request = request.header(COOKIE, cookie);
        }
        request
    }

    /// GET a page with the domain's credentials
    ///
    /// Only transport failures are errors; non-200 statuses are returned as-is.
    pub async fn get_page(
        &self,
        url: &str,
        credentials: &CredentialContext,
        domain: Domain,
    ) -> std::result::Result<PageResponse, FetchError> {
        let response = self
            .authenticated(url, credentials, domain, PAGE_ACCEPT, self.config.page_timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        Ok(PageResponse { status, body })
    }

    /// GET an image asset
    ///
    /// `referer` is the originating site root. Non-success statuses become
    /// [`FetchError::Status`].
    pub async fn get_asset(
        &self,
        url: &str,
        credentials: &CredentialContext,
        domain: Domain,
        referer: Option<&str>,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        let mut request =
            self.authenticated(url, credentials, domain, ASSET_ACCEPT, self.config.asset_timeout);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;
        Ok(bytes.to_vec())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportKind;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(&HttpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn page_request_carries_identity_cookie_and_language() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chapter/"))
            .and(header("user-agent", "TestAgent/1.0"))
            .and(header("cookie", "cf_clearance=tok"))
            .and(header_exists("accept-language"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let creds = CredentialContext::new("TestAgent/1.0").with_token(Domain::Net, "tok");
        let page = client()
            .get_page(&format!("{}/chapter/", server.uri()), &creds, Domain::Net)
            .await
            .unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn page_non_success_status_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let page = client()
            .get_page(&server.uri(), &CredentialContext::new("UA"), Domain::Net)
            .await
            .unwrap();
        assert_eq!(page.status, 503);
    }

    #[tokio::test]
    async fn empty_identity_falls_back_to_configured_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "FallbackAgent/2.0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = HttpConfig {
            user_agent: "FallbackAgent/2.0".to_string(),
            ..HttpConfig::default()
        };
        HttpClient::new(&config)
            .unwrap()
            .get_page(&server.uri(), &CredentialContext::new(""), Domain::Net)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn asset_request_sends_referer_and_image_accept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.jpg"))
            .and(header("referer", "https://reader.example.net/"))
            .and(header_exists("accept"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0xFF]))
            .mount(&server)
            .await;

        let bytes = client()
            .get_asset(
                &format!("{}/1.jpg", server.uri()),
                &CredentialContext::new("UA"),
                Domain::Net,
                Some("https://reader.example.net/"),
            )
            .await
            .unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn asset_error_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client()
            .get_asset(&server.uri(), &CredentialContext::new("UA"), Domain::Net, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn asset_timeout_is_transport_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let config = HttpConfig {
            asset_timeout: Duration::from_millis(50),
            ..HttpConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();
        let err = client
            .get_asset(&server.uri(), &CredentialContext::new("UA"), Domain::Net, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Transport {
                kind: TransportKind::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client()
            .get_page(&format!("http://{addr}/"), &CredentialContext::new("UA"), Domain::Net)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
