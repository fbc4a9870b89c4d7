//! Supported MCP protocol versions and negotiation (spec.md §4.7, §9).
//!
//! Resolves the open question in spec.md §9: the dispatcher's supported-set
//! is authoritative. `2025-11-25` is intentionally absent — the newest
//! version this server advertises and negotiates down to is `2025-06-18`.

/// Every protocol version this server accepts at `initialize`, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &["2025-06-18", "2025-03-26", "2024-11-05", "2024-10-07"];

/// The version negotiated down to when the client offers something unknown.
pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

/// Negotiate a protocol version for `initialize`: the client's offered
/// version if supported, otherwise [`LATEST_PROTOCOL_VERSION`].
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|&&v| v == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Parse the `Mcp-Protocol-Version` header (comma-separated, either casing is
/// handled by the caller reading the header) and check at least one listed
/// version is in the supported set.
pub fn any_version_supported(header_value: &str) -> bool {
    header_value
        .split(',')
        .map(str::trim)
        .any(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(&v))
}
