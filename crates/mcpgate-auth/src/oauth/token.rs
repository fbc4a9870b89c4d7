use super::OAuthEngine;
use mcpgate_core::{GateError, GateResult, token};
use sha2::{Digest, Sha256};

/// The two grants `/token` supports (spec §4.6.3).
#[derive(Debug, Clone)]
pub enum TokenGrant {
    AuthorizationCode { code: String, code_verifier: String },
    RefreshToken { refresh_token: String },
}

/// RFC 6749 §5.1 token response shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenResponseBody {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn s256_challenge(verifier: &str) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

impl OAuthEngine {
    /// # Errors
    ///
    /// `invalid_grant` for an unknown/mismatched code, a PKCE mismatch, or a
    /// transaction with no provider token; `provider_refresh_failed` if an
    /// upstream refresh attempt during the `refresh_token` grant fails.
    pub async fn token(&self, grant: TokenGrant) -> GateResult<TokenResponseBody> {
        match grant {
            TokenGrant::AuthorizationCode { code, code_verifier } => self.exchange_authorization_code(&code, &code_verifier).await,
            TokenGrant::RefreshToken { refresh_token } => self.exchange_refresh_token(&refresh_token).await,
        }
    }

    async fn exchange_authorization_code(&self, code: &str, code_verifier: &str) -> GateResult<TokenResponseBody> {
        let txn_id = self
            .store
            .get_txn_id_by_code(code)
            .await?
            .ok_or_else(|| GateError::oauth("invalid_grant", "unknown authorization code"))?;
        let txn = self
            .store
            .get_transaction(&txn_id)
            .await?
            .ok_or_else(|| GateError::oauth("invalid_grant", "transaction not found or expired"))?;

        if s256_challenge(code_verifier) != txn.code_challenge {
            return Err(GateError::oauth("invalid_grant", "PKCE verification failed"));
        }

        let Some(provider) = txn.provider.clone() else {
            self.store.delete_code(code).await?;
            return Err(GateError::oauth("invalid_grant", "transaction has no provider token"));
        };

        let rs_access = token::rs_token();
        let rs_refresh = token::rs_token();
        self.store.store_rs_mapping(rs_access.clone(), provider.clone(), Some(rs_refresh.clone())).await?;

        self.store.delete_transaction(&txn_id).await?;
        self.store.delete_code(code).await?;

        Ok(TokenResponseBody {
            access_token: rs_access,
            refresh_token: rs_refresh,
            token_type: "bearer",
            expires_in: 3600,
            scope: provider.scopes.map(|s| s.join(" ")).or(txn.scope),
        })
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> GateResult<TokenResponseBody> {
        let record = self
            .store
            .get_by_rs_refresh(refresh_token)
            .await?
            .ok_or_else(|| GateError::oauth("invalid_grant", "unknown refresh token"))?;

        if !record.provider.expiring_within(60_000) {
            let expires_in = record.provider.expires_at.map(|exp| ((exp - now_ms()).max(0)) / 1000).unwrap_or(3600);
            return Ok(TokenResponseBody {
                access_token: record.provider.access_token,
                refresh_token: record.rs_refresh_token,
                token_type: "bearer",
                expires_in,
                scope: record.provider.scopes.map(|s| s.join(" ")),
            });
        }

        let (Some(upstream_refresh), Some(config)) = (record.provider.refresh_token.clone(), self.require_provider_config()) else {
            return Ok(TokenResponseBody {
                access_token: record.provider.access_token,
                refresh_token: record.rs_refresh_token,
                token_type: "bearer",
                expires_in: 0,
                scope: record.provider.scopes.map(|s| s.join(" ")),
            });
        };

        let response = self
            .refresher
            .call_upstream(config, &upstream_refresh)
            .await
            .map_err(|e| GateError::oauth("provider_refresh_failed", format!("provider_refresh_failed: {e}")))?;

        let rotated = response.refresh_token.as_deref().is_some_and(|rt| rt != upstream_refresh);
        let scope = response.scope.clone();
        let new_provider = response.into_provider_token(Some(upstream_refresh));
        let expires_in = new_provider.expires_at.map(|exp| ((exp - now_ms()).max(0)) / 1000).unwrap_or(3600);

        let new_rs_access = rotated.then(token::rs_token);
        let updated = self
            .store
            .update_by_rs_refresh(refresh_token, new_provider, new_rs_access.clone())
            .await?
            .ok_or_else(|| GateError::oauth("invalid_grant", "refresh token record vanished during refresh"))?;

        Ok(TokenResponseBody {
            access_token: updated.provider.access_token,
            refresh_token: updated.rs_refresh_token,
            token_type: "bearer",
            expires_in,
            scope,
        })
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cimd::{FetcherConfig, MetadataFetcher};
    use crate::oauth::OAuthEngineConfig;
    use crate::refresher::Refresher;
    use crate::store::{MemoryTokenStore, TokenStore};
    use crate::types::{ProviderToken, Transaction};
    use std::sync::Arc;

    fn engine() -> OAuthEngine {
        OAuthEngine::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(MetadataFetcher::new(FetcherConfig::default()).unwrap()),
            Arc::new(Refresher::new(reqwest::Client::new())),
            None,
            OAuthEngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn pkce_mismatch_fails_invalid_grant() {
        let engine = engine();
        let mut txn = Transaction::new(s256_challenge("correct-verifier"), None, None, None);
        txn.provider = Some(ProviderToken {
            access_token: "up".into(),
            refresh_token: None,
            expires_at: None,
            scopes: None,
        });
        engine.store.save_transaction("t1", txn).await.unwrap();
        engine.store.save_code("code-1", "t1").await.unwrap();

        let err = engine
            .token(TokenGrant::AuthorizationCode {
                code: "code-1".into(),
                code_verifier: "wrong".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error(), "invalid_grant");
    }

    #[tokio::test]
    async fn successful_exchange_mints_rs_tokens_and_clears_transaction() {
        let engine = engine();
        let mut txn = Transaction::new(s256_challenge("verifier"), None, None, None);
        txn.provider = Some(ProviderToken {
            access_token: "up".into(),
            refresh_token: Some("up-refresh".into()),
            expires_at: None,
            scopes: None,
        });
        engine.store.save_transaction("t1", txn).await.unwrap();
        engine.store.save_code("code-1", "t1").await.unwrap();

        let body = engine
            .token(TokenGrant::AuthorizationCode {
                code: "code-1".into(),
                code_verifier: "verifier".into(),
            })
            .await
            .unwrap();
        assert_eq!(body.token_type, "bearer");
        assert!(engine.store.get_txn_id_by_code("code-1").await.unwrap().is_none());
        assert!(engine.store.get_by_rs_access(&body.access_token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transaction_without_provider_token_fails_invalid_grant() {
        let engine = engine();
        let txn = Transaction::new(s256_challenge("verifier"), None, None, None);
        engine.store.save_transaction("t1", txn).await.unwrap();
        engine.store.save_code("code-1", "t1").await.unwrap();

        let err = engine
            .token(TokenGrant::AuthorizationCode {
                code: "code-1".into(),
                code_verifier: "verifier".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error(), "invalid_grant");
        assert!(engine.store.get_txn_id_by_code("code-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fresh_refresh_token_is_returned_unchanged() {
        let engine = engine();
        let provider = ProviderToken {
            access_token: "access".into(),
            refresh_token: Some("upstream-refresh".into()),
            expires_at: Some(now_ms() + 3_600_000),
            scopes: None,
        };
        engine.store.store_rs_mapping("rs-access".into(), provider, Some("rs-refresh".into())).await.unwrap();

        let body = engine.token(TokenGrant::RefreshToken { refresh_token: "rs-refresh".into() }).await.unwrap();
        assert_eq!(body.access_token, "access");
    }

    #[tokio::test]
    async fn unknown_refresh_token_fails_invalid_grant() {
        let engine = engine();
        let err = engine.token(TokenGrant::RefreshToken { refresh_token: "nope".into() }).await.unwrap_err();
        assert_eq!(err.oauth_error(), "invalid_grant");
    }
}
