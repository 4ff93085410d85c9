use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use skillboard_server::routes;
use skillboard_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("skillboard=info".parse()?))
        .with_target(false)
        .init();

    let port = std::env::var("SKILLBOARD_SERVER_PORT").unwrap_or_else(|_| "5000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let state = Arc::new(AppState::from_env()?);
    let shutdown = CancellationToken::new();
    let sweepers = state.spawn_sweepers(&shutdown);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    for sweeper in sweepers {
        let _ = sweeper.await;
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Ctrl-C handler");
                shutdown.cancelled().await;
            }
        },
        () = shutdown.cancelled() => {}
    }
}
