use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::worker::LocalWorkerHandle;

/// Install a handler for SIGTERM and SIGINT (Ctrl-C elsewhere).
///
/// Returns a token that is cancelled when a signal arrives. The dashboard
/// and local workers watch it and stop.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

/// Wait up to `grace` for local workers to finish their current batch and
/// deregister. Returns how many stopped in time; the rest are aborted.
pub async fn drain_workers(handles: Vec<LocalWorkerHandle>, grace: Duration) -> usize {
    let deadline = tokio::time::Instant::now() + grace;
    let mut stopped = 0;

    for mut handle in handles {
        match tokio::time::timeout_at(deadline, &mut handle.task).await {
            Ok(_) => stopped += 1,
            Err(_) => {
                tracing::warn!(worker_id = handle.worker_id, "Worker did not stop in time, aborting");
                handle.task.abort();
            }
        }
    }
    stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn handle(task: tokio::task::JoinHandle<()>) -> LocalWorkerHandle {
        LocalWorkerHandle {
            worker_id: 0,
            connection_id: Uuid::new_v4(),
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drain_counts_finished_workers() {
        let quick = handle(tokio::spawn(async {}));
        let stuck = handle(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));

        let stopped = drain_workers(vec![quick, stuck], Duration::from_secs(1)).await;
        assert_eq!(stopped, 1);
    }
}
