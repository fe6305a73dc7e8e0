//! Heartbeat task: sample health and push it to the reporter.

use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::Result;

/// Delivery failures are logged and dropped; the tick itself never fails.
pub async fn run(engine: &Engine) -> Result<()> {
	let payload = engine.heartbeat_payload().await;
	match engine.reporter().report(&payload).await {
		Ok(()) => debug!(target = "warden.report", status = ?payload.status, "heartbeat sent"),
		Err(err) => warn!(target = "warden.report", status = ?payload.status, error = %err, "heartbeat not delivered"),
	}
	Ok(())
}
