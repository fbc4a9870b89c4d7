use super::OAuthEngine;
use mcpgate_core::token;
use serde::{Deserialize, Serialize};

/// Dynamic client registration input; all fields optional (spec §4.6.4).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub redirect_uris: Option<Vec<String>>,
    pub grant_types: Option<Vec<String>>,
    pub response_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: &'static str,
}

impl OAuthEngine {
    /// Dynamic client registration stub: no persistent record is kept,
    /// matching spec §4.6.4 ("No persistent client registration record is
    /// required by the core").
    pub fn register(&self, request: RegisterRequest) -> RegisterResponse {
        RegisterResponse {
            client_id: token::client_id(),
            redirect_uris: request.redirect_uris.unwrap_or_default(),
            grant_types: request.grant_types.unwrap_or_else(|| vec!["authorization_code".to_string(), "refresh_token".to_string()]),
            response_types: request.response_types.unwrap_or_else(|| vec!["code".to_string()]),
            token_endpoint_auth_method: "none",
        }
    }

    /// Revocation stub: always succeeds (spec §4.6.5).
    pub fn revoke(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cimd::{FetcherConfig, MetadataFetcher};
    use crate::oauth::OAuthEngineConfig;
    use crate::refresher::Refresher;
    use crate::store::MemoryTokenStore;
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

    #[test]
    fn register_applies_defaults_when_fields_omitted() {
        let response = engine().register(RegisterRequest::default());
        assert_eq!(response.grant_types, vec!["authorization_code", "refresh_token"]);
        assert_eq!(response.response_types, vec!["code"]);
        assert_eq!(response.token_endpoint_auth_method, "none");
        assert!(!response.client_id.is_empty());
    }

    #[test]
    fn register_preserves_supplied_redirect_uris() {
        let request = RegisterRequest {
            redirect_uris: Some(vec!["https://client.example.com/cb".into()]),
            ..Default::default()
        };
        let response = engine().register(request);
        assert_eq!(response.redirect_uris, vec!["https://client.example.com/cb"]);
    }

    #[test]
    fn revoke_never_panics() {
        engine().revoke();
    }
}
