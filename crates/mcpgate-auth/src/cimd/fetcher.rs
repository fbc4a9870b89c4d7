//! Fetches and caches Client ID Metadata Documents with SSRF protection,
//! a per-client rate limit, and HTTP cache-header-aware TTLs (spec §4.6.1).

use super::types::ClientMetadata;
use crate::ssrf::{self, SsrfPolicy};
use dashmap::DashMap;
use mcpgate_core::{GateError, GateResult};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CacheEntry {
    metadata: ClientMetadata,
    expires_at: SystemTime,
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: SystemTime,
}

/// Tunables for [`MetadataFetcher`]; defaults match spec §4.6.1/§5.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub max_response_bytes: usize,
    pub request_timeout: Duration,
    pub default_cache_ttl: Duration,
    pub max_cache_ttl: Duration,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub allowed_domains: Option<Vec<String>>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_response_bytes: 64 * 1024,
            request_timeout: Duration::from_secs(5),
            default_cache_ttl: Duration::from_secs(3600),
            max_cache_ttl: Duration::from_secs(86400),
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_secs(60),
            allowed_domains: None,
        }
    }
}

/// Cache occupancy snapshot, exposed for `/health` / diagnostics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub valid_entries: usize,
}

/// SSRF-guarded, caching, rate-limited fetcher for CIMD client metadata.
pub struct MetadataFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
    cache: Arc<DashMap<String, CacheEntry>>,
    rate_limits: Arc<DashMap<String, RateLimitEntry>>,
}

impl MetadataFetcher {
    /// # Errors
    ///
    /// Returns `GateError::configuration` if the HTTP client fails to build.
    pub fn new(config: FetcherConfig) -> GateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GateError::configuration(format!("failed to build CIMD HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            cache: Arc::new(DashMap::new()),
            rate_limits: Arc::new(DashMap::new()),
        })
    }

    /// Fetch, validate, and cache a client metadata document.
    ///
    /// # Errors
    ///
    /// Returns a `GateError::oauth` with one of the CIMD-specific error tags
    /// from spec §7: `ssrf_blocked:*`, `domain_not_allowed`,
    /// `metadata_too_large`, `invalid_content_type`, `invalid_json`,
    /// `invalid_metadata:*`, `client_id_mismatch`, `fetch_timeout`, or
    /// `fetch_failed:*`.
    pub async fn fetch(&self, client_id_url: &str) -> GateResult<ClientMetadata> {
        let policy = SsrfPolicy {
            allowed_domains: self.config.allowed_domains.clone(),
        };
        let url = ssrf::validate_url(client_id_url, &policy).map_err(|e| GateError::oauth(e.oauth_tag(), e.to_string()))?;
        debug!(url = %url, "CIMD fetch validated by SSRF policy");

        self.check_rate_limit(client_id_url)?;

        if let Some(cached) = self.get_cached(client_id_url) {
            debug!(url = %client_id_url, "CIMD metadata served from cache");
            return Ok(cached);
        }

        let response = self.client.get(url).header("accept", "application/json").send().await.map_err(|e| {
            if e.is_timeout() {
                GateError::oauth("fetch_timeout", "CIMD fetch timed out")
            } else {
                GateError::oauth("fetch_failed", format!("fetch_failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(GateError::oauth(
                "fetch_failed",
                format!("fetch_failed: upstream returned {}", response.status()),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("application/json") && !content_type.contains("text/json") {
            return Err(GateError::oauth("invalid_content_type", format!("unexpected content-type: {content_type}")));
        }

        if let Some(len) = response.content_length()
            && len > self.config.max_response_bytes as u64
        {
            return Err(GateError::oauth("metadata_too_large", "response exceeds maximum size"));
        }

        let cache_ttl = self.parse_cache_headers(&response);

        let body = response
            .bytes()
            .await
            .map_err(|e| GateError::oauth("fetch_failed", format!("fetch_failed: {e}")))?;
        if body.len() > self.config.max_response_bytes {
            return Err(GateError::oauth("metadata_too_large", "response exceeds maximum size"));
        }

        let metadata: ClientMetadata =
            serde_json::from_slice(&body).map_err(|e| GateError::oauth("invalid_json", e.to_string()))?;
        metadata.validate()?;
        metadata.validate_source(client_id_url)?;

        self.cache_metadata(client_id_url, metadata.clone(), cache_ttl);
        Ok(metadata)
    }

    fn check_rate_limit(&self, client_id: &str) -> GateResult<()> {
        let now = SystemTime::now();
        let mut entry = self.rate_limits.entry(client_id.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if let Ok(elapsed) = now.duration_since(entry.window_start)
            && elapsed >= self.config.rate_limit_window
        {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.config.rate_limit_max_requests {
            warn!(client_id, "CIMD rate limit exceeded");
            return Err(GateError::oauth("rate_limited", format!("rate limit exceeded for {client_id}")));
        }
        entry.count += 1;
        Ok(())
    }

    fn get_cached(&self, client_id: &str) -> Option<ClientMetadata> {
        if let Some(entry) = self.cache.get(client_id) {
            if SystemTime::now() < entry.expires_at {
                return Some(entry.metadata.clone());
            }
            drop(entry);
            self.cache.remove(client_id);
        }
        None
    }

    fn cache_metadata(&self, client_id: &str, metadata: ClientMetadata, ttl: Duration) {
        self.cache.insert(
            client_id.to_string(),
            CacheEntry {
                metadata,
                expires_at: SystemTime::now() + ttl,
            },
        );
    }

    fn parse_cache_headers(&self, response: &reqwest::Response) -> Duration {
        if let Some(cache_control) = response.headers().get("cache-control")
            && let Ok(value) = cache_control.to_str()
        {
            for directive in value.split(',') {
                let directive = directive.trim();
                if let Some(max_age) = directive.strip_prefix("max-age=")
                    && let Ok(seconds) = max_age.parse::<u64>()
                {
                    return Duration::from_secs(seconds).min(self.config.max_cache_ttl);
                }
            }
            if value.contains("no-cache") || value.contains("no-store") {
                return Duration::from_secs(0);
            }
        }
        self.config.default_cache_ttl
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        let total_entries = self.cache.len();
        let now = SystemTime::now();
        let expired = self.cache.iter().filter(|e| now >= e.expires_at).count();
        CacheStats {
            total_entries,
            expired_entries: expired,
            valid_entries: total_entries - expired,
        }
    }
}
