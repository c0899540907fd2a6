//! Process lifecycle: signal handling and bounded draining of background tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Returns a token that is cancelled on SIGINT or SIGTERM.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, initiating shutdown"),
                        _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
                        _ = token_clone.cancelled() => return,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler, only SIGINT is handled");
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, initiating shutdown"),
                        _ = token_clone.cancelled() => return,
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = ctrl_c => info!("received Ctrl+C, initiating shutdown"),
                _ = token_clone.cancelled() => return,
            }
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Wait for `tasks` to finish, giving up after `timeout`.
///
/// Returns the number of tasks that had not finished in time.
pub async fn drain(tasks: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) -> usize {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut unfinished = 0;

    for (name, handle) in tasks {
        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(())) => debug!(task = name, "task drained"),
            Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
            Err(_) => {
                warn!(task = name, "task did not drain before shutdown timeout");
                unfinished += 1;
            }
        }
    }

    if unfinished == 0 {
        info!("all tasks drained");
    }
    unfinished
}
