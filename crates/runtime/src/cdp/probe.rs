//! HTTP discovery endpoints exposed by a debugging browser.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, RuntimeError};

/// `/json/version` response subset.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser")]
	pub browser: Option<String>,
}

/// `/json/list` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub url: String,
	pub web_socket_debugger_url: Option<String>,
}

fn client(timeout: Duration) -> Result<reqwest::Client> {
	reqwest::Client::builder()
		.timeout(timeout)
		.build()
		.map_err(|e| RuntimeError::Connection(format!("failed to create HTTP client: {e}")))
}

/// Resolves version metadata on `port`, trying the usual loopback spellings.
pub async fn fetch_version(port: u16, timeout: Duration) -> Result<VersionInfo> {
	let client = client(timeout)?;
	let mut last_error = "no response".to_string();

	for url in [
		format!("http://127.0.0.1:{port}/json/version"),
		format!("http://localhost:{port}/json/version"),
		format!("http://[::1]:{port}/json/version"),
	] {
		let response = match client.get(&url).send().await {
			Ok(r) => r,
			Err(e) => {
				last_error = e.to_string();
				continue;
			}
		};

		if !response.status().is_success() {
			last_error = format!("unexpected status {}", response.status());
			continue;
		}

		return Ok(response.json().await?);
	}

	Err(RuntimeError::Connection(format!("debugging endpoint on port {port} unreachable: {last_error}")))
}

/// Lists page targets on `port`.
pub async fn list_targets(port: u16, timeout: Duration) -> Result<Vec<TargetInfo>> {
	let client = client(timeout)?;
	let response = client.get(format!("http://127.0.0.1:{port}/json/list")).send().await?;
	if !response.status().is_success() {
		return Err(RuntimeError::Connection(format!("target list returned {}", response.status())));
	}
	Ok(response.json().await?)
}
