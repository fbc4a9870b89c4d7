//! Proactive refresh of near-expiry provider tokens, with per-process
//! deduplication of concurrent refreshes for the same RS token (spec §4.5).

use crate::store::TokenStore;
use crate::types::ProviderToken;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use mcpgate_core::token::rs_token;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::warn;

/// Upstream provider credentials needed to perform a refresh call.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub accounts_url: String,
    pub token_endpoint_path: String,
}

impl ProviderConfig {
    pub fn token_endpoint(&self) -> String {
        format!("{}{}", self.accounts_url.trim_end_matches('/'), self.token_endpoint_path)
    }
}

/// The skew before expiry at which a token is considered due for refresh.
const EXPIRY_SKEW_MS: i64 = 60_000;
/// Per-process dedup window: a second refresh attempt within this long of a
/// prior one for the same RS token is skipped (spec §4.5 step 3).
const DEDUP_WINDOW: Duration = Duration::from_secs(30);
const DEDUP_CAP: usize = 1_000;

/// Retry budget for upstream refresh/code-exchange calls (spec §5 Timeouts):
/// 3 retries, exponential backoff 1s/2s/4s plus jitter.
const MAX_RETRIES: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);
const DEFAULT_RPS_LIMIT: u32 = 10;
const DEFAULT_RPS_BURST: u32 = 20;
const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    pub(crate) refresh_token: Option<String>,
    pub(crate) expires_in: Option<i64>,
    pub(crate) scope: Option<String>,
}

impl TokenResponse {
    /// Convert an upstream token response into a [`ProviderToken`], stamping
    /// `expires_at` from `expires_in` (default 3600s) relative to now.
    pub(crate) fn into_provider_token(self, fallback_refresh_token: Option<String>) -> ProviderToken {
        ProviderToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(fallback_refresh_token),
            expires_at: Some(now_ms() + self.expires_in.unwrap_or(3600) * 1000),
            scopes: self.scope.map(|s| s.split_whitespace().map(str::to_string).collect()),
        }
    }
}

/// Outcome of [`Refresher::ensure_fresh`].
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub was_refreshed: bool,
}

/// Ensures a provider token is fresh before it's handed to a tool handler,
/// deduplicating concurrent refresh attempts and degrading gracefully on
/// upstream failure (stale-but-working beats broken).
pub struct Refresher {
    http: reqwest::Client,
    recently_refreshed: Arc<DashMap<String, Instant>>,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    concurrency: Arc<Semaphore>,
}

impl Refresher {
    /// The underlying HTTP client, reused by the OAuth flow engine for the
    /// authorization-code exchange (spec §4.6.2 hits the same token endpoint).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// `RPS_LIMIT`/`CONCURRENCY_LIMIT` (spec §6) govern the token bucket and
    /// concurrency gate around every upstream refresh/code-exchange call.
    pub fn new(http: reqwest::Client) -> Self {
        let rps = env_u32("RPS_LIMIT").unwrap_or(DEFAULT_RPS_LIMIT);
        let burst = rps.max(DEFAULT_RPS_BURST);
        let concurrency = env_u32("CONCURRENCY_LIMIT").map_or(DEFAULT_CONCURRENCY_LIMIT, |n| n as usize);

        let quota = Quota::per_second(NonZeroU32::new(rps.max(1)).unwrap()).allow_burst(NonZeroU32::new(burst.max(1)).unwrap());

        Self {
            http,
            recently_refreshed: Arc::new(DashMap::new()),
            limiter: Arc::new(RateLimiter::direct(quota)),
            concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// # Errors
    ///
    /// This never returns an error: upstream/network failures degrade to
    /// the existing token per spec §4.5 step 7 / §7 propagation policy.
    pub async fn ensure_fresh(
        &self,
        rs_access_token: &str,
        store: &dyn TokenStore,
        provider_config: Option<&ProviderConfig>,
    ) -> RefreshOutcome {
        let rec = match store.get_by_rs_access(rs_access_token).await {
            Ok(Some(r)) => r,
            _ => {
                return RefreshOutcome {
                    access_token: String::new(),
                    was_refreshed: false,
                };
            }
        };

        if rec.provider.access_token.is_empty() {
            return RefreshOutcome {
                access_token: String::new(),
                was_refreshed: false,
            };
        }

        if !rec.provider.expiring_within(EXPIRY_SKEW_MS) {
            return RefreshOutcome {
                access_token: rec.provider.access_token,
                was_refreshed: false,
            };
        }

        if self.recently_refreshed(rs_access_token) {
            return RefreshOutcome {
                access_token: rec.provider.access_token,
                was_refreshed: false,
            };
        }

        let (Some(refresh_token), Some(config)) = (rec.provider.refresh_token.clone(), provider_config) else {
            warn!(rs_access_token = %mcpgate_core::redact::token_prefix(rs_access_token), "cannot refresh: missing refresh_token or provider config");
            return RefreshOutcome {
                access_token: rec.provider.access_token,
                was_refreshed: false,
            };
        };

        match self.call_upstream(config, &refresh_token).await {
            Ok(response) => {
                let rotated = response.refresh_token.as_deref().is_some_and(|rt| rt != refresh_token);
                let access_token = response.access_token.clone();
                let new_provider = response.into_provider_token(Some(refresh_token));

                let new_rs_access = rotated.then(rs_token);
                let updated = store.update_by_rs_refresh(&rec.rs_refresh_token, new_provider, new_rs_access.clone()).await;
                self.mark_refreshed(rs_access_token);

                match updated {
                    Ok(Some(updated)) => RefreshOutcome {
                        access_token: updated.provider.access_token,
                        was_refreshed: true,
                    },
                    _ => RefreshOutcome {
                        access_token,
                        was_refreshed: true,
                    },
                }
            }
            Err(e) => {
                warn!(error = %e, "upstream refresh failed, keeping existing token");
                RefreshOutcome {
                    access_token: rec.provider.access_token,
                    was_refreshed: false,
                }
            }
        }
    }

    /// Perform the actual upstream refresh call, used both by
    /// `ensure_fresh` and by the `/token refresh_token` grant (spec §4.6.3,
    /// which performs the same exchange synchronously).
    pub async fn call_upstream(&self, config: &ProviderConfig, refresh_token: &str) -> Result<TokenResponse, mcpgate_core::GateError> {
        let builder = self
            .http
            .post(config.token_endpoint())
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)]);

        let response = self.send_throttled(builder).await?;

        if !response.status().is_success() {
            return Err(mcpgate_core::GateError::upstream(format!("upstream returned {}", response.status())));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| mcpgate_core::GateError::upstream(format!("failed to parse refresh response: {e}")))
    }

    /// Rate-limited, retried send for outbound provider calls (spec §5
    /// Timeouts: token bucket + concurrency gate, 3 retries with exponential
    /// backoff and jitter). Network errors and 5xx responses are retried;
    /// any other response (including 4xx, e.g. `invalid_grant`) is handed
    /// back to the caller to interpret.
    pub(crate) async fn send_throttled(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, mcpgate_core::GateError> {
        let _permit = self.concurrency.acquire().await.expect("concurrency semaphore is never closed");
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            self.limiter.until_ready().await;

            let attempt_builder = builder.try_clone().ok_or_else(|| mcpgate_core::GateError::upstream("request body is not retryable"))?;

            match attempt_builder.send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_err = Some(mcpgate_core::GateError::upstream(format!("upstream returned {}", response.status())));
                }
                Ok(response) => return Ok(response),
                Err(e) => last_err = Some(mcpgate_core::GateError::upstream(format!("refresh request failed: {e}"))),
            }

            if attempt < MAX_RETRIES {
                tokio::time::sleep(RETRY_BASE * 2u32.pow(attempt) + jitter()).await;
            }
        }

        Err(last_err.unwrap_or_else(|| mcpgate_core::GateError::upstream("upstream refresh exhausted retries")))
    }

    fn recently_refreshed(&self, rs_access_token: &str) -> bool {
        self.recently_refreshed
            .get(rs_access_token)
            .is_some_and(|t| t.elapsed() < DEDUP_WINDOW)
    }

    fn mark_refreshed(&self, rs_access_token: &str) {
        if self.recently_refreshed.len() >= DEDUP_CAP {
            if let Some(oldest) = self
                .recently_refreshed
                .iter()
                .min_by_key(|e| *e.value())
                .map(|e| e.key().clone())
            {
                self.recently_refreshed.remove(&oldest);
            }
        }
        self.recently_refreshed.insert(rs_access_token.to_string(), Instant::now());
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn jitter() -> Duration {
    Duration::from_millis(rand::random::<u64>() % 250)
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
