//! The OAuth Flow Engine (C6): `/authorize`, the provider callback,
//! `/token` (`authorization_code` + `refresh_token` grants), `/register`,
//! and `/revoke` (spec §4.6).

mod authorize;
mod callback;
mod register;
mod token;

pub use authorize::{AuthorizeInput, AuthorizeOutcome};
pub use callback::{CallbackOutcome, CallbackQuery};
pub use register::{RegisterRequest, RegisterResponse};
pub use token::{TokenGrant, TokenResponseBody};

use crate::cimd::MetadataFetcher;
use crate::refresher::{ProviderConfig, Refresher};
use crate::store::TokenStore;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static OAuth client configuration this server presents to the upstream
/// provider, distinct from [`ProviderConfig`] (which is keyed by the
/// `PROVIDER_*` env vars and used purely for server-to-server token calls).
#[derive(Debug, Clone, Default)]
pub struct OAuthEngineConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub authorization_url: String,
    pub revocation_url: Option<String>,
    /// This server's own callback URL, registered with the upstream provider.
    pub redirect_uri: String,
    pub redirect_allowlist: Vec<String>,
    pub redirect_allow_all: bool,
    pub extra_auth_params: BTreeMap<String, String>,
    pub dev_mode: bool,
}

/// Ties together the Token Store, CIMD fetcher, and Refresher behind the
/// OAuth HTTP endpoints. One instance is shared across all requests.
pub struct OAuthEngine {
    store: Arc<dyn TokenStore>,
    metadata_fetcher: Arc<MetadataFetcher>,
    refresher: Arc<Refresher>,
    provider_config: Option<ProviderConfig>,
    config: OAuthEngineConfig,
}

impl OAuthEngine {
    /// `refresher` is shared with the auth resolver's `ensure_fresh` path so
    /// both sides of the upstream HTTP client go through one token
    /// bucket/concurrency gate (spec §5 Timeouts).
    pub fn new(
        store: Arc<dyn TokenStore>,
        metadata_fetcher: Arc<MetadataFetcher>,
        refresher: Arc<Refresher>,
        provider_config: Option<ProviderConfig>,
        config: OAuthEngineConfig,
    ) -> Self {
        Self {
            store,
            metadata_fetcher,
            refresher,
            provider_config,
            config,
        }
    }

    /// Server-to-server token calls are only possible once `PROVIDER_*` is
    /// configured; CIMD/dev-shortcut flows work without it.
    fn require_provider_config(&self) -> Option<&ProviderConfig> {
        self.provider_config.as_ref()
    }
}

/// A `client_id` that looks like `https://host/non-root-path` is treated as
/// a Client-ID-as-Metadata-Document reference (spec §4.6.1).
fn looks_like_cimd_client_id(client_id: &str) -> bool {
    let Ok(url) = url::Url::parse(client_id) else {
        return false;
    };
    url.scheme() == "https" && url.path() != "/" && !url.path().is_empty()
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Whether `redirect_uri` may be used for this flow: exact allowlist match,
/// a blanket allow-all, or (in dev mode) any loopback host.
fn redirect_allowed(redirect_uri: &str, config: &OAuthEngineConfig) -> bool {
    if config.dev_mode
        && url::Url::parse(redirect_uri)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .is_some_and(|h| is_loopback_host(&h))
    {
        return true;
    }
    config.redirect_allow_all || config.redirect_allowlist.iter().any(|allowed| allowed == redirect_uri)
}

/// Encode the composite `state` round-tripped through the upstream provider.
fn encode_state(state: &crate::types::CallbackState) -> String {
    let json = serde_json::to_vec(state).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

fn decode_state(raw: &str) -> Option<crate::types::CallbackState> {
    let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
    serde_json::from_slice(&bytes).ok()
}
