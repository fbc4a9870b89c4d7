//! Data model shared by the token store, refresher, and OAuth flow engine.

use serde::{Deserialize, Serialize};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The upstream identity provider's OAuth access/refresh token. Immutable:
/// replaced wholesale on refresh, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl ProviderToken {
    /// True once `now >= expires_at - skew_ms`. A token with no `expires_at`
    /// never reports as expiring.
    pub fn expiring_within(&self, skew_ms: i64) -> bool {
        match self.expires_at {
            Some(exp) => now_ms() >= exp - skew_ms,
            None => false,
        }
    }
}

/// A bearer token minted by this server and mapped bidirectionally to a
/// [`ProviderToken`]. Addressable by exactly one live `rs_access_token` and
/// one live `rs_refresh_token` at a time (spec §3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsRecord {
    pub rs_access_token: String,
    pub rs_refresh_token: String,
    pub provider: ProviderToken,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Default record-level TTL: 7 days.
pub const RS_RECORD_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

impl RsRecord {
    pub fn new(rs_access_token: String, rs_refresh_token: String, provider: ProviderToken) -> Self {
        let created_at = now_ms();
        Self {
            rs_access_token,
            rs_refresh_token,
            provider,
            created_at,
            expires_at: created_at + RS_RECORD_TTL_MS,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_ms() >= self.expires_at
    }
}

/// An in-flight OAuth authorization (spec §3). TTL 10 minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub code_challenge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderToken>,
}

/// Transactions and authorization codes both live for 10 minutes.
pub const TRANSACTION_TTL_MS: i64 = 10 * 60 * 1000;

impl Transaction {
    pub fn new(code_challenge: String, state: Option<String>, scope: Option<String>, sid: Option<String>) -> Self {
        Self {
            code_challenge,
            state,
            scope,
            created_at: now_ms(),
            sid,
            provider: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_ms() >= self.created_at + TRANSACTION_TTL_MS
    }
}

/// Composite OAuth `state` value round-tripped through the upstream provider
/// so the callback can recover which transaction, client state, and client
/// redirect it belongs to without server-side session affinity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackState {
    pub tid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}
