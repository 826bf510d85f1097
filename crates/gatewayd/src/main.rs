use anyhow::{Context, Result};
use clap::Parser;

mod cli;
mod config;
mod http;
mod state;

use cli::Cli;
use config::GatewayConfig;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config_path = cli.config.clone().or_else(|| {
        let default = config::default_config_path();
        default.exists().then_some(default)
    });
    let gateway_config = GatewayConfig::load(
        config_path.as_deref(),
        cli.bind.clone(),
        cli.port,
        cli.auth_mode.map(Into::into),
    )
    .context("failed to load gateway configuration")?;

    let bind_addr = gateway_config.bind_addr();
    let state = AppState::new(gateway_config);
    let app = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind gatewayd HTTP endpoint at {bind_addr}"))?;
    let local_addr = listener.local_addr().context("failed to resolve local gatewayd address")?;
    tracing::info!(addr = %local_addr, "gatewayd listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gatewayd HTTP server stopped with an error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c, shutting down");
}
