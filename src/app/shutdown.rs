use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    CtrlC,
    SigTerm,
}

/// Cancels `token` on the first SIGINT/SIGTERM. The returned task ends with
/// the token, whichever side cancels first.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_signal() => {
                tracing::info!(?signal, "shutdown requested; finishing current stage");
                token.cancel();
            }
            () = token.cancelled() => {}
        }
    })
}

/// A listener that cannot be installed never fires; the other one still can.
async fn wait_for_signal() -> ShutdownSignal {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownSignal::CtrlC,
            Err(error) => {
                tracing::warn!(%error, "failed to capture Ctrl+C signal");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(()) => ShutdownSignal::SigTerm,
                None => std::future::pending().await,
            },
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<ShutdownSignal>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = sigterm => signal,
    }
}
