//! Per-domain clearance tokens and browser identity
//!
//! A [`CredentialContext`] is built once per session, shared read-only with workers
//! through an `Arc`, and only mutated on the session path when a fresh token is
//! supplied.

use crate::http::HttpClient;
use crate::types::{Domain, Event};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cookie name used when none is configured
pub const DEFAULT_COOKIE_NAME: &str = "cf_clearance";

/// Clearance tokens, User-Agent identity and issuance time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialContext {
    tokens: HashMap<Domain, String>,
    identity: String,
    issued_at: DateTime<Utc>,
    cookie_name: String,
}

impl CredentialContext {
    /// Create a context with the given User-Agent and no tokens, issued now
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            tokens: HashMap::new(),
            identity: identity.into(),
            issued_at: Utc::now(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
        }
    }

    /// Builder-style token setter
    pub fn with_token(mut self, domain: Domain, token: impl Into<String>) -> Self {
        self.set_token(domain, token);
        self
    }

    /// Override the issuance time (restored settings)
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    /// Override the clearance cookie name
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Replace the token for `domain`; an empty token clears it
    ///
    /// Refreshes the issuance time.
    pub fn set_token(&mut self, domain: Domain, token: impl Into<String>) {
        let token = token.into();
        let token = token.trim();
        if token.is_empty() {
            self.tokens.remove(&domain);
        } else {
            self.tokens.insert(domain, token.to_string());
        }
        self.issued_at = Utc::now();
    }

    /// Token for `domain`, if any
    pub fn token_for(&self, domain: Domain) -> Option<&str> {
        self.tokens.get(&domain).map(String::as_str)
    }

    /// `Cookie` header value for `domain`, only when a token is set
    pub fn cookie_header(&self, domain: Domain) -> Option<String> {
        self.token_for(domain)
            .map(|token| format!("{}={}", self.cookie_name, token))
    }

    /// User-Agent string the tokens were issued to
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// When the tokens were issued
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Time since issuance (zero if the clock went backwards)
    pub fn age(&self) -> Duration {
        (Utc::now() - self.issued_at).to_std().unwrap_or_default()
    }

    /// Whether the tokens are older than `window`
    pub fn is_stale(&self, window: Duration) -> bool {
        self.age() > window
    }

    /// Check that the tokens still grant access to `domain`
    ///
    /// GETs `probe_url` with these credentials; valid iff the status is 200 and the body
    /// contains `marker`. Any transport failure counts as invalid.
    pub async fn probe(
        &self,
        client: &HttpClient,
        domain: Domain,
        probe_url: &str,
        marker: &str,
    ) -> bool {
        match client.get_page(probe_url, self, domain).await {
            Ok(page) => {
                let valid = page.status == 200 && page.body.contains(marker);
                tracing::debug!(domain = %domain, status = page.status, valid, "credential probe");
                valid
            }
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "credential probe failed");
                false
            }
        }
    }
}

/// Periodically report credentials older than `stale_after`
///
/// `issued_at` follows the live issuance time, so a refreshed token silences the
/// watcher at the next check. Emits [`Event::CredentialsStale`] on each check past the
/// window; never renews anything. Stops when `cancel` fires.
pub fn spawn_staleness_watcher(
    issued_at: watch::Receiver<DateTime<Utc>>,
    stale_after: Duration,
    interval: Duration,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let issued = *issued_at.borrow();
                    let age = (Utc::now() - issued).to_std().unwrap_or_default();
                    if age > stale_after {
                        tracing::warn!(age_secs = age.as_secs(), "credentials are stale, consider renewing");
                        // ignore send errors: no subscribers is fine
                        let _ = event_tx.send(Event::CredentialsStale {
                            age_secs: age.as_secs(),
                        });
                    }
                }
            }
        }
    })
}
