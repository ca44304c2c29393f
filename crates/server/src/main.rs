use anyhow::Context;
use server::{DeploymentImpl, app};
use services::services::{config::Config, maintenance::MaintenancePlanner};
use tracing::{error, info};
use utils::assets::{asset_dir, config_path};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    utils::logging::init(&log_level);

    info!("Using asset directory {}", asset_dir().display());
    let config = Config::load(&config_path()).context("failed to load config")?;
    let address = format!("{}:{}", config.server.host, config.server.port);

    let deployment = DeploymentImpl::new(config)
        .await
        .context("failed to initialise deployment")?;

    MaintenancePlanner::spawn(deployment.maintenance().clone()).await;
    if deployment.growatt().enabled() {
        deployment.growatt().clone().spawn().await;
    } else {
        info!("Growatt sync disabled");
    }

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Server running on http://{}", address);

    axum::serve(listener, app(deployment))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
