//! Client ID Metadata Document types (draft-ietf-oauth-client-id-metadata-document).
//!
//! A CIMD client presents an HTTPS URL as its `client_id`; this server
//! fetches that URL and validates the document against the rules below
//! before trusting any of its `redirect_uris` (spec §4.6.1).

use mcpgate_core::{GateError, GateResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The parsed client metadata document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMetadata {
    /// MUST be an HTTPS URL equal to the document's fetch location.
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    /// At least one entry required.
    pub redirect_uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_types: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(flatten)]
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl ClientMetadata {
    /// Validate the document shape per spec §4.6.1, independent of where it
    /// was fetched from.
    ///
    /// # Errors
    ///
    /// Returns `GateError::oauth("invalid_metadata:<detail>", ..)`.
    pub fn validate(&self) -> GateResult<()> {
        let client_id_url = url::Url::parse(&self.client_id)
            .map_err(|e| GateError::oauth("invalid_metadata:client_id", format!("invalid client_id URL: {e}")))?;
        if client_id_url.scheme() != "https" {
            return Err(GateError::oauth(
                "invalid_metadata:client_id",
                "client_id must use https",
            ));
        }
        if self.redirect_uris.is_empty() {
            return Err(GateError::oauth(
                "invalid_metadata:redirect_uris",
                "redirect_uris must be non-empty",
            ));
        }
        for uri in &self.redirect_uris {
            url::Url::parse(uri)
                .map_err(|e| GateError::oauth("invalid_metadata:redirect_uris", format!("invalid redirect URI: {e}")))?;
        }
        Ok(())
    }

    /// Validate that `fetch_url` is exactly `client_id` (spec §4.6.1:
    /// "`client_id` URL must match the request URL exactly").
    ///
    /// # Errors
    ///
    /// Returns `GateError::oauth("client_id_mismatch", ..)`.
    pub fn validate_source(&self, fetch_url: &str) -> GateResult<()> {
        if self.client_id != fetch_url {
            return Err(GateError::oauth(
                "client_id_mismatch",
                format!("document client_id {} does not match fetch URL {fetch_url}", self.client_id),
            ));
        }
        Ok(())
    }

    pub fn allows_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }
}
