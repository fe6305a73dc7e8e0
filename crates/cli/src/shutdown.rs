use tracing::{info, warn};

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};

		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => info!(target = "warden", "received Ctrl-C"),
					_ = sigterm.recv() => info!(target = "warden", "received SIGTERM"),
				}
				return;
			}
			Err(err) => warn!(target = "warden", error = %err, "SIGTERM handler unavailable; waiting for Ctrl-C only"),
		}
	}

	if let Err(err) = tokio::signal::ctrl_c().await {
		warn!(target = "warden", error = %err, "Ctrl-C handler unavailable");
		std::future::pending::<()>().await;
	}
	info!(target = "warden", "received Ctrl-C");
}
