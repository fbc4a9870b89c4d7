//! Server-level environment configuration (spec.md §6).

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_list(key: &str) -> Vec<String> {
    env_string(key)
        .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_string(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Settings recognized by the HTTP facade and dispatcher (spec.md §6
/// "Server:" row). Auth/OAuth/CIMD/Provider/Storage settings live in
/// `mcpgate_auth::AuthSettings`.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub is_production: bool,
    pub title: String,
    pub version: String,
    pub protocol_version: Option<String>,
    pub instructions: Option<String>,
    pub accept_headers: Vec<String>,
    pub log_level: String,
    pub rps_limit: u64,
    pub concurrency_limit: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            is_production: false,
            title: "mcpgate".into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: None,
            instructions: None,
            accept_headers: Vec::new(),
            log_level: "info".into(),
            rps_limit: 10,
            concurrency_limit: 5,
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("HOST").unwrap_or(defaults.host),
            port: env_string("PORT").and_then(|v| v.parse().ok()).unwrap_or(defaults.port),
            is_production: env_string("NODE_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
            title: env_string("MCP_TITLE").unwrap_or(defaults.title),
            version: env_string("MCP_VERSION").unwrap_or(defaults.version),
            protocol_version: env_string("MCP_PROTOCOL_VERSION"),
            instructions: env_string("MCP_INSTRUCTIONS"),
            accept_headers: env_list("MCP_ACCEPT_HEADERS"),
            log_level: env_string("LOG_LEVEL").unwrap_or(defaults.log_level),
            rps_limit: env_u64("RPS_LIMIT", defaults.rps_limit),
            concurrency_limit: env_u64("CONCURRENCY_LIMIT", defaults.concurrency_limit),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The origin this server presents to clients in discovery documents and
    /// 401 challenges (spec.md §6, §4.8 step 6). Derived rather than read
    /// from its own env var since spec.md names none.
    pub fn origin(&self) -> String {
        let scheme = if self.is_production { "https" } else { "http" };
        format!("{scheme}://{}", self.bind_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let settings = ServerSettings::default();
        assert_eq!(settings.port, 3000);
        assert!(!settings.is_production);
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 8080,
            ..ServerSettings::default()
        };
        assert_eq!(settings.bind_addr(), "0.0.0.0:8080");
    }
}
