#[macro_use]
extern crate tracing;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

mod api;
mod startup;
mod state;

fn config_path() -> PathBuf {
  std::env::var("CIRIS_MANAGER_CONFIG_PATH")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("/etc/ciris-manager/config.yaml"))
}

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  state::init(&config_path()).await.context("failed to initialize manager state")?;
  let app_state = state::app_state();
  logger::init(&app_state.config.logging)?;

  info!("CIRIS Manager version: v{}", env!("CARGO_PKG_VERSION"));

  startup::run(app_state).await;

  let shutdown = CancellationToken::new();
  let recovery_handle = app_state.recovery.clone().spawn(shutdown.clone());
  let retention_handle = app_state.retention.clone().spawn(shutdown.clone());

  let signal_shutdown = shutdown.clone();
  tokio::spawn(async move {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("failed to install SIGTERM handler");
    tokio::select! {
      _ = terminate.recv() => info!("received SIGTERM, shutting down"),
      _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
    }
    signal_shutdown.cancel();
  });

  let router = api::router().layer(
    CorsLayer::new()
      .allow_origin(Any)
      .allow_methods(Any)
      .allow_headers(Any),
  );

  let addr = format!(
    "{}:{}",
    app_state.config.control_plane.bind_ip, app_state.config.control_plane.port
  );
  let socket_addr =
    SocketAddr::from_str(&addr).context("failed to parse control-plane bind address")?;
  let listener = tokio::net::TcpListener::bind(socket_addr)
    .await
    .context("failed to bind control-plane listener")?;
  info!("CIRIS Manager control plane listening on http://{socket_addr}");

  let serve_shutdown = shutdown.clone();
  axum::serve(listener, router)
    .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
    .await
    .context("control-plane server failed")?;

  // The server only returns once `shutdown` has fired; this just makes sure
  // the background loops observe it too before the process exits.
  shutdown.cancel();
  let _ = tokio::join!(recovery_handle, retention_handle);
  Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  app().await
}
