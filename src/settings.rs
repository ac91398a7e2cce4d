//! Persisted user settings
//!
//! A small JSON document remembered between runs: clearance tokens per domain, the
//! User-Agent they were issued to, the archive preference, the rendering service URL
//! and the last catalog URL used.

use crate::config::Config;
use crate::credentials::CredentialContext;
use crate::error::Result;
use crate::types::Domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Clearance tokens per domain
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    /// Token for the `.fr` variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fr: Option<String>,
    /// Token for the `.net` variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
}

impl StoredTokens {
    fn get(&self, domain: Domain) -> Option<&str> {
        match domain {
            Domain::Fr => self.fr.as_deref(),
            Domain::Net => self.net.as_deref(),
        }
    }
}

/// The persisted document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Clearance tokens
    #[serde(default)]
    pub tokens: StoredTokens,

    /// User-Agent the tokens were issued to
    #[serde(default)]
    pub identity: Option<String>,

    /// Package chapters into containers
    #[serde(default = "default_archive_enabled")]
    pub archive_enabled: bool,

    /// Rendering service base URL
    #[serde(default = "default_render_service_url")]
    pub render_service_url: String,

    /// Last catalog URL used
    #[serde(default)]
    pub last_url: String,

    /// When the document was last saved
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tokens: StoredTokens::default(),
            identity: None,
            archive_enabled: default_archive_enabled(),
            render_service_url: default_render_service_url(),
            last_url: String::new(),
            issued_at: None,
        }
    }
}

fn default_archive_enabled() -> bool {
    true
}

fn default_render_service_url() -> String {
    "http://localhost:8191".to_string()
}

impl Settings {
    /// Load from `path`; a missing file yields the defaults
    ///
    /// # Errors
    /// I/O errors other than "not found" and malformed JSON.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let settings: Settings = serde_json::from_slice(&bytes)?;
                tracing::debug!(path = %path.display(), "settings loaded");
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save as pretty JSON, stamping `issued_at` with the current time
    ///
    /// # Errors
    /// I/O and serialization errors.
    pub async fn save(&mut self, path: &Path) -> Result<()> {
        self.issued_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        crate::utils::write_atomic(path, &json).await?;
        tracing::debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Whether the saved tokens are older than `window` (or were never saved)
    pub fn is_stale(&self, window: Duration) -> bool {
        match self.issued_at {
            Some(issued_at) => (Utc::now() - issued_at)
                .to_std()
                .map(|age| age > window)
                .unwrap_or(false),
            None => true,
        }
    }

    /// Copy the persisted preferences into a runtime configuration
    pub fn apply_to(&self, config: &mut Config) {
        config.archive.enabled = self.archive_enabled;
        if !self.render_service_url.trim().is_empty() {
            config.render.base_url = self.render_service_url.trim().to_string();
        }
    }

    /// Build a credential context from the stored tokens
    ///
    /// `fallback_identity` is used when no identity was saved.
    pub fn credentials(&self, config: &Config, fallback_identity: &str) -> CredentialContext {
        let identity = self
            .identity
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(fallback_identity);
        let mut creds = CredentialContext::new(identity)
            .with_cookie_name(config.credentials.cookie_name.clone());
        for domain in [Domain::Fr, Domain::Net] {
            if let Some(token) = self.tokens.get(domain) {
                creds.set_token(domain, token);
            }
        }
        match self.issued_at {
            Some(issued_at) => creds.with_issued_at(issued_at),
            None => creds,
        }
    }

    /// Record the tokens and identity of `credentials`
    pub fn store_credentials(&mut self, credentials: &CredentialContext) {
        self.tokens.fr = credentials.token_for(Domain::Fr).map(str::to_string);
        self.tokens.net = credentials.token_for(Domain::Net).map(str::to_string);
        self.identity = Some(credentials.identity().to_string());
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(&tmp.path().join("settings.json")).await.unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.archive_enabled);
        assert_eq!(settings.render_service_url, "http://localhost:8191");
        assert!(settings.is_stale(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn save_then_load_keeps_values_and_stamps_time() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("settings.json");

        let mut settings = Settings {
            tokens: StoredTokens {
                fr: Some("tok-fr".into()),
                net: None,
            },
            identity: Some("Browser/1.0".into()),
            archive_enabled: false,
            render_service_url: "http://render:9000".into(),
            last_url: "https://reader.example.fr/catalogue/x/".into(),
            issued_at: None,
        };
        settings.save(&path).await.unwrap();
        assert!(settings.issued_at.is_some());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"tokens\""), "pretty printed: {text}");
        assert!(!text.contains("\"net\""));

        let loaded = Settings::load(&path).await.unwrap();
        assert_eq!(loaded, settings);
        assert!(!loaded.is_stale(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Settings::load(&path).await,
            Err(crate::error::Error::Serialization(_))
        ));
    }

    #[test]
    fn partial_document_fills_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"last_url":"u"}"#).unwrap();
        assert_eq!(settings.last_url, "u");
        assert!(settings.archive_enabled);
        assert_eq!(settings.tokens, StoredTokens::default());
    }

    #[test]
    fn old_settings_are_stale() {
        let settings = Settings {
            issued_at: Some(Utc::now() - chrono::Duration::hours(2)),
            ..Settings::default()
        };
        assert!(settings.is_stale(Duration::from_secs(3600)));
        assert!(!settings.is_stale(Duration::from_secs(3 * 3600)));
    }

    #[test]
    fn apply_to_overrides_preferences() {
        let settings = Settings {
            archive_enabled: false,
            render_service_url: " http://render:9000 ".into(),
            ..Settings::default()
        };
        let mut config = Config::default();
        settings.apply_to(&mut config);
        assert!(!config.archive.enabled);
        assert_eq!(config.render.base_url, "http://render:9000");
    }

    #[test]
    fn credentials_round_trip_through_settings() {
        let issued = Utc::now() - chrono::Duration::minutes(5);
        let settings = Settings {
            tokens: StoredTokens {
                fr: Some("a".into()),
                net: Some("b".into()),
            },
            identity: None,
            issued_at: Some(issued),
            ..Settings::default()
        };
        let creds = settings.credentials(&Config::default(), "Fallback/2.0");
        assert_eq!(creds.identity(), "Fallback/2.0");
        assert_eq!(creds.token_for(Domain::Fr), Some("a"));
        assert_eq!(creds.cookie_header(Domain::Net).as_deref(), Some("cf_clearance=b"));
        assert_eq!(creds.issued_at(), issued);

        let mut stored = Settings::default();
        stored.store_credentials(&creds);
        assert_eq!(stored.tokens, settings.tokens);
        assert_eq!(stored.identity.as_deref(), Some("Fallback/2.0"));
    }
}
