//! Process and port helpers for the browser platform.

use tokio::process::Child;

use tracing::{debug, warn};

/// Returns `true` when `port` can be bound on localhost.
pub fn port_available(port: u16) -> bool {
	std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Asks the OS for an ephemeral port that is currently free.
pub fn free_port() -> std::io::Result<u16> {
	let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
	Ok(listener.local_addr()?.port())
}

/// Returns `true` while `child` has not exited.
pub fn child_is_running(child: &mut Child) -> bool {
	matches!(child.try_wait(), Ok(None))
}

/// Kills `child` and reaps it; already-exited children are a no-op.
pub async fn terminate(child: &mut Child) -> std::io::Result<()> {
	if !child_is_running(child) {
		debug!(target = "warden.cdp", "browser process already exited");
		return Ok(());
	}

	let pid = child.id();
	if let Err(err) = child.kill().await {
		warn!(target = "warden.cdp", ?pid, error = %err, "failed to kill browser process");
		return Err(err);
	}
	debug!(target = "warden.cdp", ?pid, "browser process reaped");
	Ok(())
}

/// Sends the kill signal without waiting; for contexts that cannot await.
pub fn start_terminate(child: &mut Child) {
	if child_is_running(child) {
		if let Err(err) = child.start_kill() {
			warn!(target = "warden.cdp", pid = ?child.id(), error = %err, "failed to kill browser process");
		}
	}
}
