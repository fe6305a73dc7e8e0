//! Stale-login check: recover abandoned work and retry failed logins.

use tracing::{debug, info, warn};
use warden_protocol::{ExternalStatus, Lifecycle};

use crate::engine::{Engine, log_failure};
use crate::error::Result;

pub async fn run(engine: &Engine) -> Result<()> {
	let state = engine.state();
	if state.lifecycle() == Lifecycle::Crash {
		debug!(target = "warden.supervisor", "stale login: crashed, skipping");
		return Ok(());
	}
	if !engine.sessions().is_allocated() {
		debug!(target = "warden.supervisor", "stale login: no session yet");
		return Ok(());
	}

	if let Some(found) = engine.classify_current().await {
		if engine.screens().is_terminal(&found.name) {
			state.crash(&format!("stale login saw screen {}", found.name));
			return Ok(());
		}
	}

	let watchdog = &engine.config().watchdog;
	if state.lifecycle() == Lifecycle::Processing && state.elapsed() > watchdog.processing_timeout() {
		warn!(
			target = "warden.supervisor",
			elapsed_s = state.elapsed().as_secs(),
			"stale login: PROCESSING timed out, treating work as abandoned"
		);
		if let Err(err) = engine.refresh().await {
			log_failure("stale login refresh", &err);
		}
		if let Err(err) = state.transition(&[Lifecycle::Processing], Lifecycle::Idle) {
			debug!(target = "warden.supervisor", error = %err, "stale login: lifecycle moved meanwhile");
		}
	}

	let snapshot = state.get();
	if !matches!(snapshot.lifecycle, Lifecycle::Idle | Lifecycle::Initial) {
		debug!(target = "warden.supervisor", lifecycle = %snapshot.lifecycle, "stale login: nothing to check");
		return Ok(());
	}
	if !matches!(snapshot.external_status, ExternalStatus::LoginError | ExternalStatus::None) {
		debug!(target = "warden.supervisor", status = %snapshot.external_status, "stale login: login healthy");
		return Ok(());
	}

	if engine.landmark_visible().await {
		match state.transition(&[Lifecycle::Initial, Lifecycle::Idle], Lifecycle::Idle) {
			Ok(_) => {
				state.set_external_status(ExternalStatus::LoginSuccess);
				info!(target = "warden.supervisor", "stale login: landmark visible, session is logged in");
			}
			Err(err) => debug!(target = "warden.supervisor", error = %err, "stale login: lifecycle moved meanwhile"),
		}
		return Ok(());
	}

	let idle_for = state.elapsed();
	if snapshot.external_status == ExternalStatus::LoginError || idle_for > watchdog.logout_duration() {
		info!(
			target = "warden.supervisor",
			status = %snapshot.external_status,
			idle_s = idle_for.as_secs(),
			"stale login: retrying login"
		);
		let result = engine.login().await;
		info!(target = "warden.supervisor", %result, "stale login: login attempted");
	}
	Ok(())
}
