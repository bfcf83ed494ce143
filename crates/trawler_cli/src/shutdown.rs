use std::sync::atomic::{AtomicBool, Ordering};

/// Global shutdown flag for graceful termination.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if shutdown has been requested.
#[inline]
pub(crate) fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Acquire)
}

#[inline]
fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
}

/// Set up the Ctrl+C handler.
///
/// The first Ctrl+C lets the item in flight finish and then stops the fetch.
/// A second one exits immediately with status 130.
pub(crate) fn setup_shutdown_handler() {
    tokio::spawn(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            return;
        }

        tracing::warn!("Shutdown requested, stopping after the current item");
        eprintln!("Press Ctrl+C again to force quit.");
        request_shutdown();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Force quit!");
            std::process::exit(130);
        }
    });
}
