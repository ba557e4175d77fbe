use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Waits for SIGINT or SIGTERM, then cancels `token` so every worker
/// finishes its in-flight record and stops.
pub async fn on_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
        () = token.cancelled() => {}
    }

    token.cancel();
}
