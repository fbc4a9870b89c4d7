//! Unified error type for the gate workspace.
//!
//! One error type threads through storage, auth resolution, the OAuth flow
//! engine, and dispatch. [`ErrorKind`] is the classification every caller
//! needs: the HTTP façade maps it to a JSON-RPC error code, the OAuth
//! endpoints map it to an OAuth 2.1 error string.

use std::fmt;

/// Result alias used throughout the workspace.
pub type GateResult<T> = Result<T, GateError>;

/// Error classification for programmatic handling and response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed JSON-RPC payload.
    Parse,
    /// Well-formed but semantically invalid JSON-RPC request.
    InvalidRequest,
    /// Unknown JSON-RPC method.
    MethodNotFound,
    /// Method params failed validation.
    InvalidParams,
    /// Unclassified internal failure.
    Internal,
    /// Session lookup failed or session header missing/invalid.
    Session,
    /// Credential missing or unresolvable; caller should see a 401 challenge.
    Unauthorized,
    /// OAuth 2.1 flow error (authorize/callback/token/CIMD).
    OAuth(&'static str),
    /// Backing store I/O failure (file/KV backend).
    Storage,
    /// Upstream HTTP call failed (provider refresh, CIMD fetch, code exchange).
    Upstream,
    /// Bad configuration (env var, key material, etc).
    Configuration,
    /// Request was cancelled via `notifications/cancelled`.
    Cancelled,
}

/// The workspace's single error type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind_label}: {message}")]
pub struct GateError {
    kind: ErrorKind,
    message: String,
    kind_label: &'static str,
}

impl GateError {
    /// Construct an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let kind_label = kind.label();
        Self {
            kind,
            message: message.into(),
            kind_label,
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message (already redaction-safe; callers must not
    /// interpolate secrets into it).
    pub fn message(&self) -> &str {
        &self.message
    }

    /// JSON-RPC error code per spec.md §4.7 / §7.
    pub fn jsonrpc_code(&self) -> i32 {
        match self.kind {
            ErrorKind::Parse => -32700,
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::InvalidParams => -32602,
            ErrorKind::Cancelled => -32603,
            ErrorKind::Internal => -32603,
            ErrorKind::Session | ErrorKind::Unauthorized | ErrorKind::OAuth(_) => -32000,
            ErrorKind::Storage | ErrorKind::Upstream | ErrorKind::Configuration => -32603,
        }
    }

    /// OAuth 2.1 error string per spec.md §7, for the `/token` and
    /// `/authorize` endpoints. Non-OAuth kinds fall back to `server_error`.
    pub fn oauth_error(&self) -> &str {
        match self.kind {
            ErrorKind::OAuth(code) => code,
            _ => "server_error",
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn method_not_found(method: impl fmt::Display) -> Self {
        Self::new(ErrorKind::MethodNotFound, format!("method not found: {method}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn oauth(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OAuth(code), message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Request was cancelled")
    }
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse_error",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::MethodNotFound => "method_not_found",
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::Internal => "internal_error",
            ErrorKind::Session => "session_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::OAuth(_) => "oauth_error",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Upstream => "upstream_error",
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        GateError::new(ErrorKind::Parse, e.to_string())
    }
}

impl From<std::io::Error> for GateError {
    fn from(e: std::io::Error) -> Self {
        GateError::new(ErrorKind::Storage, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonrpc_code_mapping() {
        assert_eq!(GateError::invalid_params("x").jsonrpc_code(), -32602);
        assert_eq!(GateError::cancelled().jsonrpc_code(), -32603);
        assert_eq!(GateError::session("no session").jsonrpc_code(), -32000);
    }

    #[test]
    fn oauth_error_string() {
        let e = GateError::oauth("invalid_grant", "bad verifier");
        assert_eq!(e.oauth_error(), "invalid_grant");
        assert_eq!(GateError::internal("x").oauth_error(), "server_error");
    }
}
