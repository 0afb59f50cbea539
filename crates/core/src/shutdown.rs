//! SIGINT/SIGTERM handling shared by the worker and the API.

/// Signal handlers registered up front, so a signal sent before [`ShutdownListener::recv`]
/// is first polled is not lost.
pub struct ShutdownListener {
    #[cfg(unix)]
    sigterm: Option<tokio::signal::unix::Signal>,
}

impl ShutdownListener {
    /// Must be called inside a Tokio runtime.
    pub fn install() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(err) => {
                    tracing::warn!(error = %err, "SIGTERM handler unavailable; listening for ctrl-c only");
                    None
                }
            };
            Self { sigterm }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Resolves with the name of the first shutdown signal received.
    #[allow(unused_mut)]
    pub async fn recv(mut self) -> &'static str {
        #[cfg(unix)]
        if let Some(sigterm) = self.sigterm.as_mut() {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return "SIGINT",
                _ = sigterm.recv() => return "SIGTERM",
            }
        }

        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
