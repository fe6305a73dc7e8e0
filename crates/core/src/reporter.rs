//! Outbound heartbeat delivery.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use warden_protocol::HeartbeatPayload;

use crate::error::{EngineError, Result};

/// Receives heartbeats. Callers treat delivery as fire-and-forget.
#[async_trait]
pub trait RemoteReporter: Send + Sync {
	async fn report(&self, payload: &HeartbeatPayload) -> Result<()>;
}

/// Posts heartbeats as JSON.
pub struct HttpReporter {
	client: reqwest::Client,
	url: String,
}

impl HttpReporter {
	pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
		let client = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(Self { client, url: url.into() })
	}
}

#[async_trait]
impl RemoteReporter for HttpReporter {
	async fn report(&self, payload: &HeartbeatPayload) -> Result<()> {
		let response = self.client.post(&self.url).json(payload).send().await?;
		let status = response.status();
		if !status.is_success() {
			return Err(EngineError::Report(format!("collector returned {status}")));
		}
		debug!(target = "warden.report", status = ?payload.status, "heartbeat delivered");
		Ok(())
	}
}

/// Used when no collector is configured.
pub struct DisabledReporter;

#[async_trait]
impl RemoteReporter for DisabledReporter {
	async fn report(&self, payload: &HeartbeatPayload) -> Result<()> {
		debug!(target = "warden.report", status = ?payload.status, "reporting disabled; heartbeat dropped");
		Ok(())
	}
}
