//! Gate configuration: resolved once at startup, immutable afterwards.
//!
//! Resolution order mirrors how the console is deployed: an explicit TOML
//! file (`WARDEN_CONFIG`), well-known file locations, then environment
//! variables. The endpoint URL and client id usually arrive as a single
//! obscured blob (`WARDEN_LICENSE_CONFIG`); plaintext variables are the
//! fallback when the blob is absent or undecodable.

use crate::obscure;
use serde::{Deserialize, Serialize};

/// Environment variable names.
pub const ENV_CONFIG_FILE: &str = "WARDEN_CONFIG";
pub const ENV_OBSCURED_BLOB: &str = "WARDEN_LICENSE_CONFIG";
pub const ENV_LICENSE_URL: &str = "WARDEN_LICENSE_URL";
pub const ENV_CLIENT_ID: &str = "WARDEN_LICENSE_CLIENT_ID";
pub const ENV_BYPASS_SECRET: &str = "WARDEN_LICENSE_BYPASS";
pub const ENV_ACTIVATED: &str = "WARDEN_LICENSE_ACTIVATED";

/// Immutable gate configuration.
///
/// An empty `endpoint_url` or `client_id` with `bypass_active == false`
/// means every gate check fails closed; there is no open-on-misconfig path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Remote licensing endpoint URL. May be empty (misconfigured).
    pub endpoint_url: String,
    /// Opaque client identifier sent with each check. May be empty.
    pub client_id: String,
    /// Local operator/development override; when true the gate allows
    /// without any network call and no secondary token is ever exposed.
    pub bypass_active: bool,
}

/// On-disk TOML shape. The bypass secret never lives in a file; bypass is
/// always derived from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileConfig {
    #[serde(default)]
    endpoint_url: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    /// Obscured blob alternative to the plaintext fields above.
    #[serde(default)]
    obscured: Option<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GateConfig {
    /// Build a config directly; used by embedders and tests.
    pub fn new(
        endpoint_url: impl Into<String>,
        client_id: impl Into<String>,
        bypass_active: bool,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            client_id: client_id.into(),
            bypass_active,
        }
    }

    /// Load configuration from a TOML file. Bypass flags still come from
    /// the environment.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let file: FileConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let (endpoint_url, client_id) = resolve_sources(
            file.obscured.as_deref(),
            file.endpoint_url.clone(),
            file.client_id.clone(),
        );
        Ok(Self {
            endpoint_url,
            client_id,
            bypass_active: bypass_from_env(),
        })
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let blob = std::env::var(ENV_OBSCURED_BLOB).ok();
        let (endpoint_url, client_id) = resolve_sources(
            blob.as_deref(),
            std::env::var(ENV_LICENSE_URL).ok(),
            std::env::var(ENV_CLIENT_ID).ok(),
        );
        Self {
            endpoint_url,
            client_id,
            bypass_active: bypass_from_env(),
        }
    }

    /// Load configuration from file if one is configured or present,
    /// otherwise from environment.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(ENV_CONFIG_FILE) {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["console_warden.toml", "/etc/console-warden/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// True when the gate can only ever fail closed.
    pub fn misconfigured(&self) -> bool {
        !self.bypass_active && (self.endpoint_url.is_empty() || self.client_id.is_empty())
    }
}

/// Resolve endpoint URL and client id from an optional obscured blob with
/// plaintext fallbacks. An undecodable blob counts as absent.
fn resolve_sources(
    blob: Option<&str>,
    plain_url: Option<String>,
    plain_client_id: Option<String>,
) -> (String, String) {
    let decoded = blob.filter(|b| !b.is_empty()).and_then(obscure::decode);
    match decoded {
        Some(c) => (c.url, c.client_id),
        None => (
            plain_url.unwrap_or_default(),
            plain_client_id.unwrap_or_default(),
        ),
    }
}

fn bypass_from_env() -> bool {
    let activated = std::env::var(ENV_ACTIVATED).unwrap_or_default();
    let secret = std::env::var(ENV_BYPASS_SECRET).unwrap_or_default();
    compute_bypass(cfg!(debug_assertions), &activated, &secret)
}

/// Bypass is active when a debug build carries a plain activation flag, or
/// when the activation flag matches the deployment's bypass secret. The
/// secret path has no rate limiting or single-use semantics; it is an
/// operator override, not an auth mechanism.
fn compute_bypass(dev_build: bool, activated: &str, secret: &str) -> bool {
    (dev_build && (activated == "true" || activated == "1"))
        || (!secret.is_empty() && activated == secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obscure::ObscuredConfig;

    #[test]
    fn test_resolve_prefers_blob() {
        let blob = obscure::encode(&ObscuredConfig {
            url: "https://lic.example/check".into(),
            client_id: "city-7".into(),
        });
        let (url, cid) = resolve_sources(
            Some(&blob),
            Some("https://plain.example".into()),
            Some("plain".into()),
        );
        assert_eq!(url, "https://lic.example/check");
        assert_eq!(cid, "city-7");
    }

    #[test]
    fn test_resolve_falls_back_on_bad_blob() {
        let (url, cid) = resolve_sources(
            Some("%%% not a blob %%%"),
            Some("https://plain.example".into()),
            Some("plain".into()),
        );
        assert_eq!(url, "https://plain.example");
        assert_eq!(cid, "plain");
    }

    #[test]
    fn test_resolve_empty_when_nothing_set() {
        let (url, cid) = resolve_sources(None, None, None);
        assert!(url.is_empty());
        assert!(cid.is_empty());
    }

    #[test]
    fn test_bypass_dev_flag() {
        assert!(compute_bypass(true, "true", ""));
        assert!(compute_bypass(true, "1", ""));
        assert!(!compute_bypass(false, "true", ""));
        assert!(!compute_bypass(true, "yes", ""));
    }

    #[test]
    fn test_bypass_secret_match() {
        assert!(compute_bypass(false, "s3cret", "s3cret"));
        assert!(!compute_bypass(false, "wrong", "s3cret"));
        // Empty secret never matches, even against an empty flag.
        assert!(!compute_bypass(false, "", ""));
    }

    #[test]
    fn test_config_parse_toml() {
        let toml = r#"
            endpoint_url = "https://lic.example/check"
            client_id = "city-7"
        "#;
        let file: FileConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            file.endpoint_url.as_deref(),
            Some("https://lic.example/check")
        );
        assert_eq!(file.client_id.as_deref(), Some("city-7"));
        assert!(file.obscured.is_none());
    }

    #[test]
    fn test_misconfigured() {
        assert!(GateConfig::new("", "", false).misconfigured());
        assert!(GateConfig::new("https://x", "", false).misconfigured());
        assert!(!GateConfig::new("https://x", "id", false).misconfigured());
        // Bypass makes an otherwise-empty config usable.
        assert!(!GateConfig::new("", "", true).misconfigured());
    }
}
