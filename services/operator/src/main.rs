//! hpascale operator
//!
//! Watches `HpaScaler` resources and keeps one scheduling task per resource
//! that moves the target autoscaler's bounds between its scale-up and
//! scale-down windows.

use std::sync::Arc;

use anyhow::{Context, Result};
use hpascale_operator::{
    clock::{Clock, SystemClock},
    config::Config,
    controller,
    kube_client::{KubeAutoscalerClient, KubeEventRecorder, KubeStatusReporter},
    Handlers, TaskManager,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to HPASCALE_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting hpascale operator");
    info!(
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        safety_interval_secs = config.safety_interval.as_secs(),
        reporter = %config.reporter,
        "Configuration loaded"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let status = Arc::new(KubeStatusReporter::new(client.clone(), &config.reporter));
    let audit = Arc::new(KubeEventRecorder::new(client.clone(), &config.reporter));
    let manager = Arc::new(TaskManager::new(
        config.manager_config(),
        Arc::new(KubeAutoscalerClient::new(client.clone(), &config.reporter)),
        status.clone(),
        audit.clone(),
        clock.clone(),
    ));
    let handlers = Arc::new(Handlers::new(manager.clone(), status, audit, clock));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut watch_handle = tokio::spawn(controller::run(
        client,
        config.watch_namespace.clone(),
        handlers,
        shutdown_rx,
    ));

    let watch_done = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut watch_handle => {
            if let Err(e) = result {
                error!(error = %e, "Watch loop panicked");
            } else {
                warn!("Watch loop exited");
            }
            true
        }
    };

    let _ = shutdown_tx.send(true);
    if !watch_done {
        if let Err(e) = watch_handle.await {
            error!(error = %e, "Watch loop panicked");
        }
    }

    manager.shutdown().await;
    info!("Operator shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
