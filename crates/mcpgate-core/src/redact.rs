//! Structured-logging redaction.
//!
//! Every log line that might carry a credential goes through [`token_prefix`]
//! or [`redact_json`] first. Keys matching `password|token|secret|key|auth|
//! api_key` (case-insensitive) are redacted recursively in any JSON dump of
//! config or resource state, per spec.md §7.

use serde_json::Value;

const SENSITIVE_SUBSTRINGS: &[&str] = &["password", "token", "secret", "key", "auth", "api_key"];

/// Redact a bearer/opaque token for logging: first 8 chars + ellipsis.
///
/// ```
/// assert_eq!(mcpgate_core::redact::token_prefix("abcdefghijklmnop"), "abcdefgh…");
/// assert_eq!(mcpgate_core::redact::token_prefix("short"), "short");
/// ```
pub fn token_prefix(token: &str) -> String {
    if token.len() <= 8 {
        token.to_string()
    } else {
        format!("{}…", &token[..8])
    }
}

fn key_is_sensitive(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// Recursively redact any object key that looks like a credential, replacing
/// its value with `"***redacted***"`. Arrays and nested objects are walked;
/// non-object/array leaves are left untouched.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if key_is_sensitive(k) {
                    out.insert(k.clone(), Value::String("***redacted***".to_string()));
                } else {
                    out.insert(k.clone(), redact_json(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_nested_sensitive_keys() {
        let input = json!({
            "client_id": "abc",
            "provider": {
                "access_token": "xyz123",
                "nested": { "api_key": "shh" }
            },
            "list": [{ "password": "p" }]
        });
        let out = redact_json(&input);
        assert_eq!(out["client_id"], json!("abc"));
        assert_eq!(out["provider"]["access_token"], json!("***redacted***"));
        assert_eq!(out["provider"]["nested"]["api_key"], json!("***redacted***"));
        assert_eq!(out["list"][0]["password"], json!("***redacted***"));
    }

    #[test]
    fn token_prefix_short_passthrough() {
        assert_eq!(token_prefix(""), "");
        assert_eq!(token_prefix("12345678"), "12345678");
        assert_eq!(token_prefix("123456789"), "12345678…");
    }
}
