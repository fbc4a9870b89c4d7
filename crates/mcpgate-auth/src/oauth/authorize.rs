use super::{OAuthEngine, looks_like_cimd_client_id, redirect_allowed};
use crate::types::{CallbackState, Transaction};
use mcpgate_core::{GateError, GateResult, token};

/// Input to [`OAuthEngine::authorize`] (spec §4.6.1).
#[derive(Debug, Clone, Default)]
pub struct AuthorizeInput {
    pub client_id: Option<String>,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub sid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizeOutcome {
    pub redirect_to: String,
    pub txn_id: String,
}

impl OAuthEngine {
    /// # Errors
    ///
    /// `invalid_request` for missing/invalid mandatory fields or an
    /// unregistered redirect URI; CIMD fetch errors propagate with their
    /// own `oauth_error` tags (spec §7).
    pub async fn authorize(&self, input: AuthorizeInput) -> GateResult<AuthorizeOutcome> {
        if input.redirect_uri.is_empty() || input.code_challenge.is_empty() || input.code_challenge_method != "S256" {
            return Err(GateError::oauth("invalid_request", "redirect_uri, code_challenge, and code_challenge_method=S256 are required"));
        }

        if let Some(client_id) = input.client_id.as_deref().filter(|c| looks_like_cimd_client_id(c)) {
            let metadata = self.metadata_fetcher.fetch(client_id).await?;
            if !metadata.allows_redirect_uri(&input.redirect_uri) {
                return Err(GateError::oauth("invalid_request", "redirect_uri is not registered for this client"));
            }
        } else if !redirect_allowed(&input.redirect_uri, &self.config) {
            return Err(GateError::oauth("invalid_request", "redirect_uri is not allowlisted"));
        }

        let txn_id = token::txn_id();
        let txn = Transaction::new(input.code_challenge.clone(), input.state.clone(), input.scope.clone(), input.sid.clone());
        self.store.save_transaction(&txn_id, txn).await?;

        match self.require_provider_config() {
            Some(_provider) => {
                let state = CallbackState {
                    tid: txn_id.clone(),
                    cs: input.state.clone(),
                    cr: Some(input.redirect_uri.clone()),
                    sid: input.sid.clone(),
                };
                let redirect_to = self.build_upstream_authorize_url(&input, &state)?;
                Ok(AuthorizeOutcome { redirect_to, txn_id })
            }
            None => {
                let code = token::random_token(24);
                self.store.save_code(&code, &txn_id).await?;
                let mut redirect = url::Url::parse(&input.redirect_uri).map_err(|_| GateError::oauth("invalid_request", "redirect_uri is not a valid URL"))?;
                {
                    let mut pairs = redirect.query_pairs_mut();
                    pairs.append_pair("code", &code);
                    if let Some(state) = &input.state {
                        pairs.append_pair("state", state);
                    }
                }
                Ok(AuthorizeOutcome {
                    redirect_to: redirect.to_string(),
                    txn_id,
                })
            }
        }
    }

    fn build_upstream_authorize_url(&self, input: &AuthorizeInput, state: &CallbackState) -> GateResult<String> {
        let mut url = url::Url::parse(&self.config.authorization_url).map_err(|e| GateError::configuration(format!("invalid OAUTH_AUTHORIZATION_URL: {e}")))?;
        let scope = if !self.config.scopes.is_empty() {
            self.config.scopes.join(" ")
        } else {
            input.scope.clone().unwrap_or_default()
        };
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &self.config.client_id);
            pairs.append_pair("redirect_uri", &self.config.redirect_uri);
            if !scope.is_empty() {
                pairs.append_pair("scope", &scope);
            }
            pairs.append_pair("state", &super::encode_state(state));
            for (key, value) in &self.config.extra_auth_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cimd::{FetcherConfig, MetadataFetcher};
    use crate::oauth::OAuthEngineConfig;
    use crate::refresher::Refresher;
    use crate::store::MemoryTokenStore;
    use std::sync::Arc;

    fn engine(config: OAuthEngineConfig) -> OAuthEngine {
        OAuthEngine::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(MetadataFetcher::new(FetcherConfig::default()).unwrap()),
            Arc::new(Refresher::new(reqwest::Client::new())),
            None,
            config,
        )
    }

    fn valid_input() -> AuthorizeInput {
        AuthorizeInput {
            client_id: None,
            redirect_uri: "http://localhost:3000/cb".into(),
            code_challenge: "chal".into(),
            code_challenge_method: "S256".into(),
            state: Some("client-state".into()),
            scope: None,
            sid: None,
        }
    }

    #[tokio::test]
    async fn rejects_missing_mandatory_fields() {
        let engine = engine(OAuthEngineConfig::default());
        let mut input = valid_input();
        input.code_challenge_method = "plain".into();
        let err = engine.authorize(input).await.unwrap_err();
        assert_eq!(err.oauth_error(), "invalid_request");
    }

    #[tokio::test]
    async fn dev_shortcut_mints_code_when_no_provider_configured() {
        let config = OAuthEngineConfig {
            dev_mode: true,
            ..Default::default()
        };
        let engine = engine(config);
        let outcome = engine.authorize(valid_input()).await.unwrap();
        assert!(outcome.redirect_to.contains("code="));
        assert!(outcome.redirect_to.contains("state=client-state"));
    }

    #[tokio::test]
    async fn rejects_redirect_uri_outside_allowlist_in_production() {
        let config = OAuthEngineConfig {
            dev_mode: false,
            redirect_allow_all: false,
            redirect_allowlist: vec![],
            ..Default::default()
        };
        let engine = engine(config);
        let mut input = valid_input();
        input.redirect_uri = "https://evil.example.com/cb".into();
        let err = engine.authorize(input).await.unwrap_err();
        assert_eq!(err.oauth_error(), "invalid_request");
    }
}
