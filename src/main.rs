use jitter::{
    AppState,
    config::{self, Config},
    db,
    media::BlobStore,
};
use tokio::{
    net::TcpListener,
    signal::ctrl_c,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = config::load_env(None);
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,jitter=debug")),
        )
        .init();
    if let Some(path) = env_file {
        info!(path = %path.display(), "loaded environment file");
    }

    let config = Config::load();
    if config.dev_tokens {
        warn!("dev tokens enabled: POST /users/token issues tokens without credentials");
    }

    let db_pool = db::connect(&config.database_url).await?;
    let blobs = BlobStore::new(config.media_dir.clone(), config.max_upload_bytes).await?;
    let addr = config.addr;

    let app = jitter::router(AppState::new(db_pool, blobs, config));

    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!(error = %e, "could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "could not listen for SIGTERM");
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
}
