//! OAuth 2.1 resource-server bridge: opaque RS tokens, CIMD/SSRF-guarded
//! client validation, and upstream token refresh.
//!
//! This crate owns components C1 (Token Store), C4 (Auth Resolver), C5
//! (Refresher), and C6 (OAuth Flow Engine) of the overall design: it never
//! terminates MCP requests itself, only resolves and refreshes the
//! credentials that `mcpgate-server` attaches to outbound calls.

pub mod cimd;
pub mod config;
pub mod crypto;
pub mod oauth;
pub mod refresher;
pub mod resolver;
pub mod ssrf;
pub mod store;
pub mod types;

pub use config::AuthSettings;
pub use oauth::{OAuthEngine, OAuthEngineConfig};
pub use refresher::{ProviderConfig, RefreshOutcome, Refresher};
pub use resolver::{AuthConfig, AuthStrategy, ResolvedAuth};
pub use store::{FileTokenStore, KvNamespace, KvTokenStore, MemoryTokenStore, TokenStore};
pub use types::{CallbackState, ProviderToken, RsRecord, Transaction};
