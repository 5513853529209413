use super::build_manager;
use anyhow::{Context, Result};
use campusvault_core::CoreResult;
use campusvault_service::{BackupJob, Config, Scheduler, SystemTimer};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Run the backup scheduler in the foreground until SIGINT or SIGTERM.
pub async fn run(config: &Config) -> Result<()> {
    let manager = Arc::new(build_manager(config)?);
    let job = Arc::new(BackupJob::new(Arc::clone(&manager)));

    let mut scheduler = Scheduler::new(Arc::new(SystemTimer));
    for (id, name, trigger) in config.triggers().context("invalid scheduler triggers")? {
        scheduler.add_job(id, name, trigger, job.clone())?;
    }

    tracing::info!(
        database = %manager.settings().database_path.display(),
        backup_dir = %manager.settings().backup_dir.display(),
        jobs = scheduler.job_count(),
        "🚀 Backup scheduler starting"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    if config.scheduler.run_on_start
        && initial_backup(job.run_once(), shutdown.as_mut()).await
    {
        tracing::info!("Backup scheduler shutdown complete");
        return Ok(());
    }

    scheduler.start().context("failed to start scheduler")?;

    shutdown.await;

    scheduler.stop().await.context("failed to stop scheduler")?;
    tracing::info!("Backup scheduler shutdown complete");
    Ok(())
}

/// Run the initial backup while watching for shutdown.
///
/// A shutdown request lets the backup finish and returns `true`.
async fn initial_backup<T>(
    backup: impl Future<Output = CoreResult<T>>,
    shutdown: Pin<&mut impl Future<Output = ()>>,
) -> bool {
    tracing::info!("Running initial backup");
    tokio::pin!(backup);

    let (result, interrupted) = tokio::select! {
        result = &mut backup => (result, false),
        () = shutdown => {
            tracing::info!("Shutdown requested, waiting for initial backup to finish");
            (backup.await, true)
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Initial backup failed");
    }
    interrupted
}

/// Resolves on CTRL+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL+C signal, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown");
        },
    }
}
