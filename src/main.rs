use std::net::SocketAddr;
use std::sync::Arc;

use axum::serve;
use dotenvy::dotenv;
use finance_bridge::{
    api,
    infrastructure::{config::Config, db, state::AppState, store},
    jobs, telemetry,
};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    telemetry::init();
    let config = Arc::new(Config::from_env()?);

    let pool = if config.cache.provider == "postgres" {
        let pool = db::connect(&config.database).await?;
        db::run_migrations(&pool).await?;
        info!("database migrations completed successfully");
        Some(pool)
    } else {
        None
    };
    let stores = store::build_stores(&config.cache, pool)?;
    let state = Arc::new(AppState::new(Arc::clone(&config), stores)?);

    let router = api::build_router(Arc::clone(&state));

    let addr: SocketAddr = config.bind_address().parse()?;
    info!(%addr, cache = %config.cache.provider, "starting finance bridge api");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let workers = jobs::spawn_all(Arc::clone(&state));

    let server = serve(listener, router.into_make_service());

    tokio::select! {
        res = server => {
            if let Err(err) = res {
                warn!(error = ?err, "server exited with error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    for worker in workers {
        worker.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = ?err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to install SIGTERM handler");
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
