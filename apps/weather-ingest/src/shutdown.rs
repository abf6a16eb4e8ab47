use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
///
/// The SIGTERM handler is installed before this returns, so a signal that
/// arrives before the future is first polled is still observed.
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ShutdownReason>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => ShutdownReason::Interrupt,
                Err(err) => {
                    tracing::error!(error = %err, "failed to listen for Ctrl-C");
                    std::future::pending().await
                }
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match terminate.recv().await {
                Some(()) => ShutdownReason::Terminate,
                None => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<ShutdownReason>();

        tokio::select! {
            reason = ctrl_c => reason,
            reason = terminate => reason,
        }
    })
}
