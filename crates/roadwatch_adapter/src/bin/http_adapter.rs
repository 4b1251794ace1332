#![forbid(unsafe_code)]

use std::{env, net::SocketAddr, sync::Arc};

use roadwatch_adapter::{build_router, AdapterState};
use roadwatch_engines::dev_identity::{StaticIdentityConfig, StaticIdentityProvider};
use roadwatch_engines::http_backend::{HttpBackend, HttpBackendConfig};
use roadwatch_os::{Console, ConsoleConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = env::var("ROADWATCH_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8090".to_string());
    let addr: SocketAddr = bind.parse()?;

    let backend_config = HttpBackendConfig::from_env();
    let backend = Arc::new(HttpBackend::new(backend_config.clone())?);
    let identity_config = StaticIdentityConfig::from_env();
    if identity_config.users.is_empty() {
        warn!("ROADWATCH_DEV_USERS is empty; no operator can sign in");
    }
    let identity = Arc::new(StaticIdentityProvider::new(identity_config));
    let console_config = ConsoleConfig::from_env();
    let console = Console::new(console_config.clone(), backend.clone(), identity)?;
    console.start_session_listener()?;

    let app = build_router(AdapterState::new(Arc::new(console), Some(backend)));

    info!(
        %addr,
        backend = %backend_config.base_url,
        stats_cadence_ms = console_config.stats_cadence_ms,
        "roadwatch_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "ctrl-c handler unavailable");
            }
        })
        .await?;
    Ok(())
}
