use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Detects signals sent to the process, or shutdown being requested from inside the daemon.
///
/// On Windows detached processes can't detect signals sent to them, so there the daemon is
/// stopped by killing it.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt");
            cancelation.cancel();
        },
        _ = terminate() => {
            info!("Received terminate");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => {},
    };
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!("Can't listen for SIGTERM {e:?}");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
