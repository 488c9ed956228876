//! The inbound HTTP router and outbound dispatcher: the process that turns
//! a `HandlerRegistry` and a `Backend` into a running relay.

pub mod dispatch;
pub mod router;
pub mod state;

use std::sync::Arc;

use tracing::info;

pub use state::ServerState;

/// Bind the inbound router and run it to completion (or until Ctrl+C).
pub async fn start_server(state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Courier listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
}
