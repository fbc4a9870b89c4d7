//! Classifies an incoming request's credential and produces the header/token
//! set downstream handlers should see (spec §4.4).

use crate::refresher::{ProviderConfig, Refresher};
use crate::store::TokenStore;
use crate::types::ProviderToken;
use http::HeaderMap;
use std::collections::BTreeMap;

/// One of the five credential strategies a deployment can configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    None,
    ApiKey,
    Bearer,
    Custom,
    OAuth,
}

/// Static configuration the resolver composes over forwarded request
/// headers (spec §4.4, `api_key`/`bearer`/`custom` strategies).
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub strategy: Option<AuthStrategy>,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub custom_headers: BTreeMap<String, String>,
    pub accept_headers: Vec<String>,
    pub require_rs: bool,
    pub allow_direct_bearer: bool,
    pub provider_config: Option<ProviderConfig>,
}

/// Where an `oauth`-strategy request landed: no RS token was presented, one
/// was presented but didn't map to a Token Store record, or it resolved to
/// a live record (spec §4.4, §7 "unresolvable RS token" classification).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RsTokenStatus {
    #[default]
    Absent,
    Unresolved,
    Resolved,
}

/// The resolved credential for one request, handed to handlers.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAuth {
    pub strategy: Option<AuthStrategy>,
    pub auth_headers: BTreeMap<String, String>,
    pub resolved_headers: BTreeMap<String, String>,
    pub provider_token: Option<String>,
    pub provider: Option<ProviderToken>,
    pub rs_token: Option<String>,
    pub rs_token_status: RsTokenStatus,
}

/// Headers always forwarded regardless of the configured accept-list
/// (spec §4.4).
const ALWAYS_FORWARDED: &[&str] = &["authorization", "x-api-key", "x-auth-token"];

fn lowercased_header_map(headers: &HeaderMap, accept: &[String]) -> BTreeMap<String, String> {
    let mut allow: Vec<String> = accept.iter().map(|h| h.to_ascii_lowercase()).collect();
    allow.extend(ALWAYS_FORWARDED.iter().map(|h| h.to_string()));

    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_ascii_lowercase();
            if !allow.contains(&name) {
                return None;
            }
            value.to_str().ok().map(|v| (name, v.to_string()))
        })
        .collect()
}

/// Resolve a request's credential per the configured [`AuthStrategy`]
/// (spec §4.4). For `oauth`, looks up the RS token in the Token Store and
/// asks the [`Refresher`] to ensure freshness before rewriting the outbound
/// `Authorization` header.
pub async fn resolve(
    headers: &HeaderMap,
    config: &AuthConfig,
    store: &dyn TokenStore,
    refresher: &Refresher,
) -> ResolvedAuth {
    let auth_headers = lowercased_header_map(headers, &config.accept_headers);
    let strategy = config.strategy;

    match strategy {
        None | Some(AuthStrategy::None) => ResolvedAuth {
            strategy,
            resolved_headers: auth_headers.clone(),
            auth_headers,
            ..Default::default()
        },
        Some(AuthStrategy::ApiKey) => {
            let mut resolved = auth_headers.clone();
            if let Some(key) = &config.api_key {
                resolved.insert("authorization".to_string(), format!("Bearer {key}"));
            }
            ResolvedAuth {
                strategy,
                auth_headers,
                resolved_headers: resolved,
                provider_token: config.api_key.clone(),
                ..Default::default()
            }
        }
        Some(AuthStrategy::Bearer) => {
            let mut resolved = auth_headers.clone();
            if let Some(token) = &config.bearer_token {
                resolved.insert("authorization".to_string(), format!("Bearer {token}"));
            }
            ResolvedAuth {
                strategy,
                auth_headers,
                resolved_headers: resolved,
                provider_token: config.bearer_token.clone(),
                ..Default::default()
            }
        }
        Some(AuthStrategy::Custom) => {
            let mut resolved = auth_headers.clone();
            for (k, v) in &config.custom_headers {
                resolved.insert(k.to_ascii_lowercase(), v.clone());
            }
            ResolvedAuth {
                strategy,
                auth_headers,
                resolved_headers: resolved,
                ..Default::default()
            }
        }
        Some(AuthStrategy::OAuth) => resolve_oauth(auth_headers, config, store, refresher).await,
    }
}

async fn resolve_oauth(
    auth_headers: BTreeMap<String, String>,
    config: &AuthConfig,
    store: &dyn TokenStore,
    refresher: &Refresher,
) -> ResolvedAuth {
    let rs_token = auth_headers
        .get("authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let Some(rs_token) = rs_token else {
        return ResolvedAuth {
            strategy: Some(AuthStrategy::OAuth),
            resolved_headers: auth_headers.clone(),
            auth_headers,
            ..Default::default()
        };
    };

    let record = store.get_by_rs_access(&rs_token).await.ok().flatten();

    let Some(record) = record else {
        let mut resolved = auth_headers.clone();
        if config.require_rs && !config.allow_direct_bearer {
            resolved.remove("authorization");
        }
        return ResolvedAuth {
            strategy: Some(AuthStrategy::OAuth),
            auth_headers,
            resolved_headers: resolved,
            rs_token: Some(rs_token),
            rs_token_status: RsTokenStatus::Unresolved,
            ..Default::default()
        };
    };

    let outcome = refresher.ensure_fresh(&rs_token, store, config.provider_config.as_ref()).await;
    let mut resolved = auth_headers.clone();
    resolved.insert("authorization".to_string(), format!("Bearer {}", outcome.access_token));

    ResolvedAuth {
        strategy: Some(AuthStrategy::OAuth),
        auth_headers,
        resolved_headers: resolved,
        provider_token: Some(outcome.access_token),
        provider: Some(record.provider),
        rs_token: Some(rs_token),
        rs_token_status: RsTokenStatus::Resolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use http::{HeaderMap, HeaderValue};

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("authorization", HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
        h
    }

    #[tokio::test]
    async fn none_strategy_is_identity_pass_through() {
        let store = MemoryTokenStore::new();
        let refresher = Refresher::new(reqwest::Client::new());
        let headers = headers_with_bearer("raw-token");
        let config = AuthConfig {
            strategy: Some(AuthStrategy::None),
            ..Default::default()
        };

        let resolved = resolve(&headers, &config, &store, &refresher).await;
        assert_eq!(resolved.resolved_headers.get("authorization").unwrap(), "Bearer raw-token");
    }

    #[tokio::test]
    async fn api_key_strategy_overrides_forwarded_authorization() {
        let store = MemoryTokenStore::new();
        let refresher = Refresher::new(reqwest::Client::new());
        let headers = headers_with_bearer("client-sent");
        let config = AuthConfig {
            strategy: Some(AuthStrategy::ApiKey),
            api_key: Some("configured-key".to_string()),
            ..Default::default()
        };

        let resolved = resolve(&headers, &config, &store, &refresher).await;
        assert_eq!(resolved.resolved_headers.get("authorization").unwrap(), "Bearer configured-key");
        assert_eq!(resolved.provider_token.as_deref(), Some("configured-key"));
    }

    #[tokio::test]
    async fn oauth_strategy_strips_authorization_when_rs_token_unresolvable() {
        let store = MemoryTokenStore::new();
        let refresher = Refresher::new(reqwest::Client::new());
        let headers = headers_with_bearer("unknown-rs-token");
        let config = AuthConfig {
            strategy: Some(AuthStrategy::OAuth),
            require_rs: true,
            allow_direct_bearer: false,
            ..Default::default()
        };

        let resolved = resolve(&headers, &config, &store, &refresher).await;
        assert!(resolved.resolved_headers.get("authorization").is_none());
        assert_eq!(resolved.rs_token_status, RsTokenStatus::Unresolved);
    }

    #[tokio::test]
    async fn oauth_strategy_reports_absent_when_no_bearer_is_presented() {
        let store = MemoryTokenStore::new();
        let refresher = Refresher::new(reqwest::Client::new());
        let config = AuthConfig {
            strategy: Some(AuthStrategy::OAuth),
            require_rs: true,
            ..Default::default()
        };

        let resolved = resolve(&HeaderMap::new(), &config, &store, &refresher).await;
        assert_eq!(resolved.rs_token_status, RsTokenStatus::Absent);
        assert!(resolved.rs_token.is_none());
    }

    #[tokio::test]
    async fn oauth_strategy_rewrites_to_upstream_token() {
        let store = MemoryTokenStore::new();
        let provider = ProviderToken {
            access_token: "upstream-token".into(),
            refresh_token: None,
            expires_at: None,
            scopes: None,
        };
        store.store_rs_mapping("rs-access".into(), provider, Some("rs-refresh".into())).await.unwrap();

        let refresher = Refresher::new(reqwest::Client::new());
        let headers = headers_with_bearer("rs-access");
        let config = AuthConfig {
            strategy: Some(AuthStrategy::OAuth),
            ..Default::default()
        };

        let resolved = resolve(&headers, &config, &store, &refresher).await;
        assert_eq!(resolved.resolved_headers.get("authorization").unwrap(), "Bearer upstream-token");
        assert_eq!(resolved.rs_token_status, RsTokenStatus::Resolved);
    }
}
