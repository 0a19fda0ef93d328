use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shogi_analyzer_core::{Analyzer, AnalyzerConfig};

mod config;
mod routes;

use config::ServerConfig;

pub struct AppState {
    pub analyzer: Analyzer,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("server failed to start: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let server_config = ServerConfig::from_env()?;
    let analyzer_config = AnalyzerConfig::from_env()?;

    let analyzer = match Analyzer::start(&analyzer_config).await {
        Ok(analyzer) => analyzer,
        Err(e) if server_config.require_engine => return Err(e.into()),
        Err(e) => {
            error!("engine unavailable: {}", e);
            warn!(
                "place the engine at {} (or set ENGINE_PATH), make it executable and restart",
                analyzer_config.engine.path.display()
            );
            Analyzer::unavailable(e.to_string(), &analyzer_config)
        }
    };

    let state = Arc::new(AppState {
        analyzer: analyzer.clone(),
    });
    let app = routes::router(state, &server_config.static_dir);

    let listener = tokio::net::TcpListener::bind(server_config.addr()).await?;

    info!("Server running at http://{}", listener.local_addr()?);
    info!("  GET  /api/health        - health check");
    info!("  POST /api/analyze       - analyze one position");
    info!("  POST /api/analyze-kifu  - analyze a whole game");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            analyzer.shutdown().await;
        })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("shutdown signal received");
}
