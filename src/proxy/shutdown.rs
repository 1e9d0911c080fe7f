use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tokio::sync::Notify;

/// Coordinates graceful shutdown between OS signals and programmatic stops.
pub struct ShutdownManager {
    shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Resolve on Ctrl-C, SIGTERM, or [`signal_shutdown`](Self::signal_shutdown).
    pub async fn wait_for_shutdown(&self) -> std::io::Result<()> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_shutting_down() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
                _ = &mut notified => {},
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = signal::ctrl_c() => {},
                _ = &mut notified => {},
            }
        }

        self.shutdown.store(true, Ordering::SeqCst);
        tracing::info!("Shutting down gracefully...");
        Ok(())
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
