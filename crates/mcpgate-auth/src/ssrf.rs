//! SSRF (Server-Side Request Forgery) protection for CIMD client metadata
//! fetches (spec §4.6.1).
//!
//! Checks are purely syntactic against the URL and its host component — no
//! DNS resolution is performed here. A client that DNS-rebinds past these
//! checks is still constrained by `reqwest`'s own connector and the fetcher's
//! size/timeout/redirect limits in [`crate::cimd::fetcher`].

use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use url::Url;

/// Hostnames blocked outright regardless of suffix rules.
const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// Hostname suffixes that are never allowed as CIMD fetch targets.
const BLOCKED_SUFFIXES: &[&str] = &[".local", ".internal", ".localhost", ".localdomain", ".corp", ".lan"];

/// SSRF validation failure, carrying the `ssrf_blocked:<reason>` tag used in
/// the OAuth error body (spec §7).
#[derive(Debug, Clone, Error)]
pub enum SsrfError {
    #[error("ssrf_blocked:invalid_url")]
    InvalidUrl,
    #[error("ssrf_blocked:scheme_not_https")]
    NotHttps,
    #[error("ssrf_blocked:blocked_hostname")]
    BlockedHostname,
    #[error("ssrf_blocked:private_ip")]
    PrivateIp,
    #[error("ssrf_blocked:root_path")]
    RootPath,
    #[error("domain_not_allowed")]
    DomainNotAllowed,
}

impl SsrfError {
    /// The OAuth 2.1 error tag reported to the client (spec §7).
    pub fn oauth_tag(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "ssrf_blocked:invalid_url",
            Self::NotHttps => "ssrf_blocked:scheme_not_https",
            Self::BlockedHostname => "ssrf_blocked:blocked_hostname",
            Self::PrivateIp => "ssrf_blocked:private_ip",
            Self::RootPath => "ssrf_blocked:root_path",
            Self::DomainNotAllowed => "domain_not_allowed",
        }
    }
}

/// Policy knobs for [`validate_url`]. `allowed_domains` is the
/// `CIMD_ALLOWED_DOMAINS` configuration: when set, the host must equal an
/// entry exactly or be a subdomain of one (leading-dot suffix match).
#[derive(Debug, Clone, Default)]
pub struct SsrfPolicy {
    pub allowed_domains: Option<Vec<String>>,
}

/// Validate a CIMD client-id URL against the fixed SSRF ruleset plus an
/// optional domain allowlist.
///
/// # Errors
///
/// Returns the specific [`SsrfError`] variant the URL failed.
pub fn validate_url(url_str: &str, policy: &SsrfPolicy) -> Result<Url, SsrfError> {
    let url = Url::parse(url_str).map_err(|_| SsrfError::InvalidUrl)?;

    if url.scheme() != "https" {
        return Err(SsrfError::NotHttps);
    }

    let host = url.host_str().ok_or(SsrfError::InvalidUrl)?;
    validate_host(host)?;

    if matches!(url.path(), "" | "/") {
        return Err(SsrfError::RootPath);
    }

    if let Some(allowed) = &policy.allowed_domains
        && !allowed
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    {
        return Err(SsrfError::DomainNotAllowed);
    }

    Ok(url)
}

/// Validate a bare hostname against the blocklist, suffix rules, and
/// private/loopback/link-local IP ranges (spec §4.6.1).
///
/// # Errors
///
/// Returns [`SsrfError::BlockedHostname`] or [`SsrfError::PrivateIp`].
pub fn validate_host(host: &str) -> Result<(), SsrfError> {
    let lower = host.to_ascii_lowercase();

    if BLOCKED_HOSTNAMES.contains(&lower.as_str()) {
        return Err(SsrfError::BlockedHostname);
    }
    if BLOCKED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        return Err(SsrfError::BlockedHostname);
    }

    if let Ok(ip) = lower.parse::<IpAddr>() {
        validate_ip(&ip)?;
    }

    Ok(())
}

/// Validate a resolved/literal IP address against the private-range rules.
///
/// # Errors
///
/// Returns [`SsrfError::PrivateIp`] for loopback, private, link-local, or
/// unspecified addresses.
pub fn validate_ip(ip: &IpAddr) -> Result<(), SsrfError> {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() {
                return Err(SsrfError::PrivateIp);
            }
            if *v4 == Ipv4Addr::new(169, 254, 169, 254) {
                return Err(SsrfError::PrivateIp);
            }
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return Err(SsrfError::PrivateIp);
            }
            // Unique local (fc00::/7)
            if v6.segments()[0] & 0xfe00 == 0xfc00 {
                return Err(SsrfError::PrivateIp);
            }
            // Link-local (fe80::/10)
            if v6.segments()[0] & 0xffc0 == 0xfe80 {
                return Err(SsrfError::PrivateIp);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_https() {
        assert!(matches!(
            validate_url("http://example.com/cimd.json", &SsrfPolicy::default()),
            Err(SsrfError::NotHttps)
        ));
    }

    #[test]
    fn rejects_root_path() {
        assert!(matches!(
            validate_url("https://example.com/", &SsrfPolicy::default()),
            Err(SsrfError::RootPath)
        ));
    }

    #[test]
    fn rejects_blocked_hostnames() {
        for h in ["localhost", "127.0.0.1", "::1", "0.0.0.0"] {
            let url = format!("https://{h}/cimd.json");
            assert!(validate_url(&url, &SsrfPolicy::default()).is_err(), "{h} should be blocked");
        }
    }

    #[test]
    fn rejects_blocked_suffixes() {
        for suffix in [".local", ".internal", ".localhost", ".localdomain", ".corp", ".lan"] {
            let url = format!("https://app{suffix}/cimd.json");
            assert!(validate_url(&url, &SsrfPolicy::default()).is_err());
        }
    }

    #[test]
    fn rejects_private_ipv4_ranges() {
        for host in ["10.0.0.1", "172.16.0.1", "172.31.255.255", "192.168.1.1", "169.254.0.1"] {
            let url = format!("https://{host}/cimd.json");
            assert!(validate_url(&url, &SsrfPolicy::default()).is_err(), "{host} should be blocked");
        }
    }

    #[test]
    fn allows_public_host() {
        assert!(validate_url("https://app.example.com/cimd.json", &SsrfPolicy::default()).is_ok());
    }

    #[test]
    fn allowed_domains_enforced() {
        let policy = SsrfPolicy {
            allowed_domains: Some(vec!["example.com".to_string()]),
        };
        assert!(validate_url("https://app.example.com/cimd.json", &policy).is_ok());
        assert!(validate_url("https://example.com/cimd.json", &policy).is_ok());
        assert!(matches!(
            validate_url("https://evil.org/cimd.json", &policy),
            Err(SsrfError::DomainNotAllowed)
        ));
    }
}
