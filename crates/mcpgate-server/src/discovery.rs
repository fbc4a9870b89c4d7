//! Discovery documents (spec.md §6): RFC 8414 authorization-server metadata
//! and RFC 9728 protected-resource metadata. Shapes are only specified at
//! §6 ("discovery metadata document shapes" are explicitly out of scope
//! beyond this), so these are the minimal fields a client needs to drive
//! the flows this server actually implements.

use serde_json::{Value, json};

/// `GET /.well-known/oauth-authorization-server`.
pub fn authorization_server_metadata(origin: &str) -> Value {
    json!({
        "issuer": origin,
        "authorization_endpoint": format!("{origin}/authorize"),
        "token_endpoint": format!("{origin}/token"),
        "registration_endpoint": format!("{origin}/register"),
        "revocation_endpoint": format!("{origin}/revoke"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_basic"],
    })
}

/// `GET /.well-known/oauth-protected-resource[?sid=]` (spec.md §4.8 step 5
/// builds the `authorization_uri` this document is reachable from).
pub fn protected_resource_metadata(origin: &str, resource_uri: Option<&str>, sid: Option<&str>) -> Value {
    let mut authorization_uri = format!("{origin}/authorize");
    if let Some(sid) = sid {
        authorization_uri.push_str("?sid=");
        authorization_uri.push_str(sid);
    }
    json!({
        "resource": resource_uri.unwrap_or(origin),
        "authorization_servers": [origin],
        "bearer_methods_supported": ["header"],
        "authorization_uri": authorization_uri,
    })
}

/// `GET /health` liveness body.
pub fn health_body() -> Value {
    json!({ "status": "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_server_metadata_points_at_this_origin() {
        let doc = authorization_server_metadata("https://gate.example.com");
        assert_eq!(doc["token_endpoint"], json!("https://gate.example.com/token"));
        assert_eq!(doc["code_challenge_methods_supported"], json!(["S256"]));
    }

    #[test]
    fn protected_resource_metadata_echoes_sid() {
        let doc = protected_resource_metadata("https://gate.example.com", None, Some("sess-1"));
        assert_eq!(doc["authorization_uri"], json!("https://gate.example.com/authorize?sid=sess-1"));
    }
}
