use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use nanoindex::config::Config;
use nanoindex::search::SearchEngine;

pub async fn run(config: Config, engine: Arc<SearchEngine>) -> anyhow::Result<()> {
    ensure_data_dir(&config.data_dir)?;
    let abs_path = fs::canonicalize(&config.data_dir)?;
    tracing::info!("data directory: {}", abs_path.display());

    let addr = SocketAddr::new(config.bind_addr, config.port);
    let app = nanoindex::api::router(engine.clone(), Arc::new(config));

    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.save_agent();
    tracing::info!("server stopped");
    Ok(())
}

fn ensure_data_dir(path: &str) -> anyhow::Result<()> {
    let p = Path::new(path);
    if !p.exists() {
        fs::create_dir_all(p)?;
    } else if !p.is_dir() {
        anyhow::bail!("DATA_DIR exists but is not a directory: {}", p.display());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
