//! Entitlement gate: decides whether the console may render at all.
//!
//! The gate sits in front of the application tree, independent of the
//! backend's own authentication. It checks a remote licensing endpoint
//! with a two-tier tolerance for outages: results are served from a hot
//! cache for six hours, and a previously-validated "ok" survives endpoint
//! outages for up to twenty-four hours after the last completed fetch.
//! Short blips are invisible; a revoked entitlement still locks out within
//! a bounded window.
//!
//! `check` never returns an error. Every path, including malformed bodies
//! and timeouts, resolves to a [`GateState`].

use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cached results are served without a network call for this long.
pub const FRESH_WINDOW_MS: i64 = 6 * 60 * 60 * 1000;
/// A prior "ok" survives endpoint outages for this long after the last
/// completed fetch.
pub const STALE_GRACE_MS: i64 = 24 * 60 * 60 * 1000;
/// Hard client-side timeout on the licensing request.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Shown on connectivity failure. An explicit deny deliberately carries an
/// empty message instead; the asymmetry is part of the observable UI text.
pub const FETCH_FAILED_MESSAGE: &str = "Connection timed out or unavailable.";

/// UI-facing gate state. `check` only ever resolves to `Ok` or `Fail`;
/// `Checking` is what an embedding UI shows while the future is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Checking,
    Ok,
    Fail { message: String },
}

impl GateState {
    /// Failure with no user-facing message: misconfiguration and explicit
    /// denies are indistinguishable on screen.
    fn fail_silent() -> Self {
        GateState::Fail {
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, GateState::Ok)
    }
}

/// Errors from one licensing fetch. Internal to the gate; callers of
/// [`Gate::check`] never see them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("endpoint returned HTTP {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Body(String),
}

/// Decoded licensing response.
#[derive(Debug, Clone)]
pub struct LicenseReply {
    pub licensed: bool,
    pub access_token: Option<String>,
}

/// One licensing fetch. Object-safe so tests can substitute a scripted
/// endpoint for the HTTP client.
#[async_trait]
pub trait LicenseEndpoint: Send + Sync {
    async fn fetch(&self, client_id: &str) -> Result<LicenseReply, EndpointError>;
}

/// Production endpoint: `GET <url>?client=<id>` with a JSON accept header
/// and the hard [`CHECK_TIMEOUT`].
pub struct HttpEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CHECK_TIMEOUT)
            .build()
            .expect("HTTP client with static options");
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl LicenseEndpoint for HttpEndpoint {
    async fn fetch(&self, client_id: &str) -> Result<LicenseReply, EndpointError> {
        let url = format!("{}?client={}", self.url, urlencoding::encode(client_id));
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EndpointError::Status(status.as_u16()));
        }

        // Lenient parse: `licensed` counts only as a JSON boolean,
        // `accessToken` only as a JSON string. Anything else is absent.
        let body: Value = response
            .json()
            .await
            .map_err(|e| EndpointError::Body(e.to_string()))?;
        Ok(LicenseReply {
            licensed: body.get("licensed").and_then(Value::as_bool).unwrap_or(false),
            access_token: body
                .get("accessToken")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

struct CacheEntry {
    ok: bool,
    at: i64,
    token: Option<String>,
}

/// Per-gate cache. `last_fetch_at` tracks the last *completed* fetch and
/// anchors the stale-ok grace window; it survives `clear_cache` and error
/// paths, while `entry` does not.
#[derive(Default)]
struct GateCache {
    entry: Option<CacheEntry>,
    last_fetch_at: i64,
}

/// The gate controller. Owns its cache, so independent instances never
/// cross-contaminate.
pub struct Gate {
    config: GateConfig,
    endpoint: Box<dyn LicenseEndpoint>,
    clock: Arc<dyn Clock>,
    cache: Mutex<GateCache>,
}

impl Gate {
    pub fn new(config: GateConfig) -> Self {
        let endpoint = Box::new(HttpEndpoint::new(config.endpoint_url.clone()));
        Self::with_parts(config, endpoint, Arc::new(SystemClock))
    }

    /// Construct with an explicit endpoint and clock; used by tests and by
    /// embedders that already own an HTTP layer.
    pub fn with_parts(
        config: GateConfig,
        endpoint: Box<dyn LicenseEndpoint>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            endpoint,
            clock,
            cache: Mutex::new(GateCache::default()),
        }
    }

    /// Run one gate check. Never errors; may suspend up to
    /// [`CHECK_TIMEOUT`] on the network.
    pub async fn check(&self) -> GateState {
        let check_id = Uuid::new_v4();
        let now = self.clock.now_ms();

        if self.config.bypass_active {
            debug!(%check_id, "bypass active, allowing without network check");
            self.cache.lock().entry = Some(CacheEntry {
                ok: true,
                at: now,
                token: None,
            });
            return GateState::Ok;
        }

        if self.config.misconfigured() {
            debug!(%check_id, "endpoint url or client id missing, failing closed");
            return GateState::fail_silent();
        }

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.entry.as_ref().filter(|e| now - e.at < FRESH_WINDOW_MS) {
                debug!(%check_id, cached_ok = entry.ok, "served from cache");
                return if entry.ok {
                    GateState::Ok
                } else {
                    GateState::fail_silent()
                };
            }
        }

        match self.endpoint.fetch(&self.config.client_id).await {
            Ok(reply) => {
                let mut cache = self.cache.lock();
                cache.last_fetch_at = now;
                let licensed = reply.licensed;
                cache.entry = Some(CacheEntry {
                    ok: licensed,
                    at: now,
                    token: reply.access_token,
                });
                if licensed {
                    debug!(%check_id, "licensed");
                    GateState::Ok
                } else {
                    warn!(%check_id, "licensing endpoint denied");
                    GateState::fail_silent()
                }
            }
            Err(e) => {
                let mut cache = self.cache.lock();
                let recently_validated = cache.last_fetch_at > 0
                    && now - cache.last_fetch_at < STALE_GRACE_MS
                    && cache.entry.as_ref().is_some_and(|entry| entry.ok);
                if recently_validated {
                    warn!(%check_id, error = %e, "endpoint unreachable, honoring recent ok result");
                    GateState::Ok
                } else {
                    warn!(%check_id, error = %e, "endpoint unreachable and no recent ok result");
                    cache.entry = None;
                    GateState::Fail {
                        message: FETCH_FAILED_MESSAGE.to_string(),
                    }
                }
            }
        }
    }

    /// Discard the cached result so the next check hits the network (or
    /// re-evaluates bypass). Wired to the blocking screen's retry button.
    pub fn clear_cache(&self) {
        self.cache.lock().entry = None;
    }

    /// The secondary credential from the last check, for attachment to
    /// other outbound calls. `None` when bypass is active, the gate is not
    /// currently ok, or the endpoint issued no token. Side-effect-free.
    pub fn secondary_token(&self) -> Option<String> {
        if self.config.bypass_active {
            return None;
        }
        let cache = self.cache.lock();
        cache
            .entry
            .as_ref()
            .filter(|entry| entry.ok)
            .and_then(|entry| entry.token.clone())
    }
}
