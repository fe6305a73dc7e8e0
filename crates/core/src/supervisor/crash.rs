//! Crash check: rebuild the session while the engine is crashed.

use tracing::{debug, info};
use warden_protocol::Lifecycle;

use crate::engine::Engine;
use crate::error::Result;
use crate::session::RestartOutcome;

pub async fn run(engine: &Engine) -> Result<()> {
	if engine.state().lifecycle() != Lifecycle::Crash {
		debug!(target = "warden.supervisor", "crash check: engine healthy");
		return Ok(());
	}

	match engine.sessions().restart().await {
		RestartOutcome::Recovered => {
			let result = engine.login().await;
			info!(target = "warden.supervisor", %result, "crash check: session rebuilt");
		}
		RestartOutcome::Failed => info!(target = "warden.supervisor", "crash check: rebuild failed; retrying next tick"),
		RestartOutcome::Skipped => debug!(target = "warden.supervisor", "crash check: restart skipped"),
	}
	Ok(())
}
