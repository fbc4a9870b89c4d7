//! Environment-driven configuration for the auth strategy, the OAuth
//! provider, CIMD fetching, and token storage (spec §6).

use crate::cimd::FetcherConfig;
use crate::refresher::ProviderConfig;
use crate::resolver::{AuthConfig as ResolverConfig, AuthStrategy};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_strategy(value: &str) -> AuthStrategy {
    match value {
        "oauth" => AuthStrategy::OAuth,
        "bearer" => AuthStrategy::Bearer,
        "api_key" => AuthStrategy::ApiKey,
        "custom" => AuthStrategy::Custom,
        _ => AuthStrategy::None,
    }
}

fn parse_custom_headers(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect()
}

/// Top-level settings assembled from the environment, which downstream
/// components consume as their own narrower config types.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub enabled: bool,
    pub resource_uri: Option<String>,
    pub discovery_url: Option<String>,
    pub resolver: ResolverConfig,
    pub provider: Option<ProviderConfig>,
    pub cimd: FetcherConfig,
    pub rs_tokens_file: Option<String>,
    pub rs_tokens_enc_key: Option<String>,
}

impl AuthSettings {
    /// Read every recognized env key (spec §6); unset keys fall back to
    /// documented defaults. Never panics: malformed numeric/bool values
    /// fall back rather than aborting startup.
    pub fn from_env() -> Self {
        let strategy = env::var("AUTH_STRATEGY").ok().map(|v| parse_strategy(&v));
        let require_rs = env_bool("AUTH_REQUIRE_RS", false);
        let allow_direct_bearer = env_bool("AUTH_ALLOW_DIRECT_BEARER", false);

        let resolver = ResolverConfig {
            strategy,
            api_key: env::var("API_KEY").ok(),
            bearer_token: env::var("BEARER_TOKEN").ok(),
            custom_headers: env::var("CUSTOM_HEADERS").ok().map(|v| parse_custom_headers(&v)).unwrap_or_default(),
            accept_headers: env::var("API_KEY_HEADER").ok().into_iter().collect(),
            require_rs,
            allow_direct_bearer,
            provider_config: None,
        };

        let provider = match (env::var("PROVIDER_CLIENT_ID"), env::var("PROVIDER_CLIENT_SECRET"), env::var("PROVIDER_ACCOUNTS_URL")) {
            (Ok(client_id), Ok(client_secret), Ok(accounts_url)) => Some(ProviderConfig {
                client_id,
                client_secret,
                accounts_url,
                token_endpoint_path: env::var("OAUTH_TOKEN_URL").unwrap_or_else(|_| "/oauth/token".to_string()),
            }),
            _ => None,
        };

        let resolver = ResolverConfig {
            provider_config: provider.clone(),
            ..resolver
        };

        let cimd = FetcherConfig {
            max_response_bytes: env_u64("CIMD_MAX_RESPONSE_BYTES", 64 * 1024) as usize,
            request_timeout: Duration::from_millis(env_u64("CIMD_FETCH_TIMEOUT_MS", 5_000)),
            allowed_domains: env::var("CIMD_ALLOWED_DOMAINS").ok().map(|v| v.split(',').map(|s| s.trim().to_string()).collect()),
            ..FetcherConfig::default()
        };

        Self {
            enabled: env_bool("AUTH_ENABLED", strategy.is_some()),
            resource_uri: env::var("AUTH_RESOURCE_URI").ok(),
            discovery_url: env::var("AUTH_DISCOVERY_URL").ok(),
            resolver,
            provider,
            cimd,
            rs_tokens_file: env::var("RS_TOKENS_FILE").ok(),
            rs_tokens_enc_key: env::var("RS_TOKENS_ENC_KEY").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strategy_defaults_to_none_for_unknown_values() {
        assert_eq!(parse_strategy("bogus"), AuthStrategy::None);
        assert_eq!(parse_strategy("oauth"), AuthStrategy::OAuth);
    }

    #[test]
    fn custom_headers_parse_colon_separated_pairs() {
        let headers = parse_custom_headers("X-Foo:bar, X-Baz:qux");
        assert_eq!(headers.get("x-foo").map(String::as_str), Some("bar"));
        assert_eq!(headers.get("x-baz").map(String::as_str), Some("qux"));
    }
}
