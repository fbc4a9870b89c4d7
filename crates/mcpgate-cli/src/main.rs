//! Boots the gate: loads `AuthSettings`/`ServerSettings` from the
//! environment, wires the Token Store, Refresher, CIMD fetcher, and OAuth
//! Flow Engine from `mcpgate-auth` to the dispatcher and HTTP facade from
//! `mcpgate-server`, spawns the background sweeps (spec.md §5), and serves
//! until a shutdown signal arrives.

use clap::Parser;
use mcpgate_auth::cimd::MetadataFetcher;
use mcpgate_auth::oauth::OAuthEngineConfig;
use mcpgate_auth::refresher::Refresher;
use mcpgate_auth::{AuthSettings, FileTokenStore, MemoryTokenStore, OAuthEngine, TokenStore};
use mcpgate_server::config::ServerSettings;
use mcpgate_server::dispatcher::{Dispatcher, ServerInfo};
use mcpgate_server::facade::{self, FacadeState};
use mcpgate_server::request_context::{self, ContextRegistry};
use mcpgate_server::session::{self, SessionStore};
use mcpgate_server::tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Command-line overrides for the `HOST`/`PORT` env vars (spec.md §6); every
/// other setting is environment-only, matching `ServerSettings::from_env`.
#[derive(Parser, Debug)]
#[command(name = "mcpgate", version, about = "MCP JSON-RPC server and OAuth 2.1 resource-server bridge")]
struct Cli {
    #[arg(long, env = "HOST")]
    host: Option<String>,

    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = ServerSettings::from_env();
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    let settings = Arc::new(settings);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let auth_settings = AuthSettings::from_env();

    let token_store: Arc<dyn TokenStore> = if let Some(path) = &auth_settings.rs_tokens_file {
        FileTokenStore::open(path.into(), auth_settings.rs_tokens_enc_key.as_deref()).await?
    } else {
        Arc::new(MemoryTokenStore::new())
    };

    let http_client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
    let metadata_fetcher = Arc::new(MetadataFetcher::new(auth_settings.cimd.clone())?);
    // Shared across the facade's `resolve()` calls and the OAuth flow
    // engine's code-exchange/refresh-grant paths so every upstream call goes
    // through one token bucket and concurrency gate (spec §5 Timeouts).
    let refresher = Arc::new(Refresher::new(http_client));

    let oauth_config = OAuthEngineConfig {
        client_id: std::env::var("OAUTH_CLIENT_ID").unwrap_or_default(),
        client_secret: std::env::var("OAUTH_CLIENT_SECRET").unwrap_or_default(),
        scopes: std::env::var("OAUTH_SCOPES").map(|v| v.split(' ').map(str::to_string).collect()).unwrap_or_default(),
        authorization_url: std::env::var("OAUTH_AUTHORIZATION_URL").unwrap_or_default(),
        revocation_url: std::env::var("OAUTH_REVOCATION_URL").ok(),
        redirect_uri: format!("{}/oauth/callback", settings.origin()),
        redirect_allowlist: std::env::var("OAUTH_REDIRECT_ALLOWLIST").map(|v| v.split(',').map(str::to_string).collect()).unwrap_or_default(),
        redirect_allow_all: !settings.is_production,
        extra_auth_params: Default::default(),
        dev_mode: !settings.is_production,
    };

    let oauth_engine = Arc::new(OAuthEngine::new(
        Arc::clone(&token_store),
        Arc::clone(&metadata_fetcher),
        Arc::clone(&refresher),
        auth_settings.provider.clone(),
        oauth_config,
    ));

    let sessions = Arc::new(SessionStore::new());
    let contexts = Arc::new(ContextRegistry::new());
    let tools = Arc::new(ToolRegistry::new());

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&sessions),
        Arc::clone(&contexts),
        Arc::clone(&tools),
        ServerInfo {
            title: settings.title.clone(),
            version: settings.version.clone(),
            instructions: settings.instructions.clone(),
        },
    ));

    let facade_state = Arc::new(FacadeState {
        dispatcher,
        sessions: Arc::clone(&sessions),
        contexts: Arc::clone(&contexts),
        auth_config: Arc::new(auth_settings.resolver),
        token_store,
        refresher,
        oauth_engine,
        settings: Arc::clone(&settings),
    });

    session::spawn_sweeper(Arc::clone(&sessions));
    request_context::spawn_sweeper(Arc::clone(&contexts));

    let app = facade::router(facade_state);
    let listener = tokio::net::TcpListener::bind(settings.bind_addr()).await?;
    tracing::info!(addr = %settings.bind_addr(), "mcpgate listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
