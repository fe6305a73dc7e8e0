//! Stuck-state check: keep an idle session warm and unstick hung work.

use tracing::{debug, warn};
use warden_protocol::Lifecycle;

use crate::engine::{Engine, log_failure};
use crate::error::Result;

pub async fn run(engine: &Engine) -> Result<()> {
	let state = engine.state();
	let lifecycle = state.lifecycle();
	if matches!(lifecycle, Lifecycle::Crash | Lifecycle::Initial) {
		debug!(target = "warden.supervisor", %lifecycle, "stuck state: skipping");
		return Ok(());
	}
	if !engine.sessions().is_allocated() {
		debug!(target = "warden.supervisor", "stuck state: no session yet");
		return Ok(());
	}

	// A terminated session outranks everything else.
	if let Some(found) = engine.classify_current().await {
		if engine.screens().is_terminal(&found.name) {
			state.crash(&format!("stuck state saw screen {}", found.name));
			return Ok(());
		}
	}

	let watchdog = &engine.config().watchdog;
	let elapsed = state.elapsed();
	match state.lifecycle() {
		Lifecycle::Idle if elapsed > watchdog.idle_refresh() => {
			debug!(target = "warden.supervisor", elapsed_s = elapsed.as_secs(), "stuck state: refreshing idle session");
			if let Err(err) = engine.refresh().await {
				log_failure("idle refresh", &err);
			}
			state.touch();
		}
		Lifecycle::Processing if elapsed > watchdog.processing_stuck() => {
			warn!(target = "warden.supervisor", elapsed_s = elapsed.as_secs(), "stuck state: PROCESSING hung, forcing IDLE");
			if let Err(err) = engine.refresh().await {
				log_failure("stuck refresh", &err);
			}
			if let Err(err) = state.transition(&[Lifecycle::Processing], Lifecycle::Idle) {
				debug!(target = "warden.supervisor", error = %err, "stuck state: lifecycle moved meanwhile");
			}
		}
		_ => {}
	}
	Ok(())
}
