use super::{OAuthEngine, decode_state, redirect_allowed};
use mcpgate_core::{GateError, GateResult, token};

/// Raw query parameters the provider redirects back with (spec §4.6.2).
#[derive(Debug, Clone)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub redirect_to: String,
}

impl OAuthEngine {
    /// # Errors
    ///
    /// `unknown_txn` (bad/expired state or transaction), `provider_no_token`
    /// (upstream granted no access token), `provider_token_error: <code>
    /// <description>` (upstream returned an OAuth error body), or
    /// `fetch_failed: <msg>` (network failure) — all per spec §4.6.2.
    pub async fn handle_callback(&self, query: CallbackQuery) -> GateResult<CallbackOutcome> {
        let state = decode_state(&query.state).ok_or_else(|| GateError::oauth("unknown_txn", "state could not be decoded"))?;
        let mut txn = self
            .store
            .get_transaction(&state.tid)
            .await?
            .ok_or_else(|| GateError::oauth("unknown_txn", "transaction not found or expired"))?;

        let provider_config = self.require_provider_config().ok_or_else(|| GateError::configuration("no provider configured for callback exchange"))?;

        let builder = self
            .refresher
            .http()
            .post(provider_config.token_endpoint())
            .basic_auth(&provider_config.client_id, Some(&provider_config.client_secret))
            .form(&[("grant_type", "authorization_code"), ("code", &query.code), ("redirect_uri", &self.config.redirect_uri)]);

        let response = self
            .refresher
            .send_throttled(builder)
            .await
            .map_err(|e| GateError::oauth("fetch_failed", format!("fetch_failed: {e}")))?;

        if !response.status().is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let code = body.get("error").and_then(|v| v.as_str()).unwrap_or("unknown_error");
            let description = body.get("error_description").and_then(|v| v.as_str()).unwrap_or("");
            return Err(GateError::oauth("provider_token_error", format!("provider_token_error: {code} {description}")));
        }

        let token_response: crate::refresher::TokenResponse = response
            .json()
            .await
            .map_err(|e| GateError::oauth("fetch_failed", format!("fetch_failed: {e}")))?;

        if token_response.access_token.is_empty() {
            return Err(GateError::oauth("provider_no_token", "provider did not grant an access token"));
        }

        let provider_token = token_response.into_provider_token(None);
        txn.provider = Some(provider_token);
        self.store.save_transaction(&state.tid, txn).await?;

        let code = token::random_token(24);
        self.store.save_code(&code, &state.tid).await?;

        let client_redirect = state.cr.as_deref().unwrap_or_default();
        if !redirect_allowed(client_redirect, &self.config) {
            return Err(GateError::oauth("invalid_request", "client redirect_uri is no longer allowlisted"));
        }

        let mut redirect = url::Url::parse(client_redirect).map_err(|_| GateError::oauth("invalid_request", "stored client redirect_uri is invalid"))?;
        {
            let mut pairs = redirect.query_pairs_mut();
            pairs.append_pair("code", &code);
            if let Some(cs) = &state.cs {
                pairs.append_pair("state", cs);
            }
        }

        Ok(CallbackOutcome {
            redirect_to: redirect.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cimd::{FetcherConfig, MetadataFetcher};
    use crate::oauth::OAuthEngineConfig;
    use crate::refresher::Refresher;
    use crate::store::{MemoryTokenStore, TokenStore};
    use crate::types::CallbackState;
    use std::sync::Arc;

    fn engine() -> OAuthEngine {
        OAuthEngine::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(MetadataFetcher::new(FetcherConfig::default()).unwrap()),
            Arc::new(Refresher::new(reqwest::Client::new())),
            None,
            OAuthEngineConfig {
                dev_mode: true,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn unknown_transaction_is_rejected() {
        let engine = engine();
        let state = CallbackState {
            tid: "missing-txn".into(),
            cs: None,
            cr: Some("http://localhost/cb".into()),
            sid: None,
        };
        let encoded = super::super::encode_state(&state);
        let err = engine
            .handle_callback(CallbackQuery {
                code: "provider-code".into(),
                state: encoded,
            })
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error(), "unknown_txn");
    }

    #[tokio::test]
    async fn garbled_state_is_rejected() {
        let engine = engine();
        let err = engine
            .handle_callback(CallbackQuery {
                code: "provider-code".into(),
                state: "not-valid-base64-json!!".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error(), "unknown_txn");
    }

    #[tokio::test]
    async fn missing_provider_config_is_a_configuration_error() {
        let engine = engine();
        let store = &engine.store;
        store
            .save_transaction("t1", crate::types::Transaction::new("chal".into(), None, None, None))
            .await
            .unwrap();
        let state = CallbackState {
            tid: "t1".into(),
            cs: None,
            cr: Some("http://localhost/cb".into()),
            sid: None,
        };
        let encoded = super::super::encode_state(&state);
        let result = engine
            .handle_callback(CallbackQuery {
                code: "provider-code".into(),
                state: encoded,
            })
            .await;
        assert!(result.is_err());
    }
}
