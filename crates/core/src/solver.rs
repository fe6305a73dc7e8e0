//! HTTP client for the external challenge-solving service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::retry::ChallengeSolver;

/// Marker the service puts in answers it could not read.
const UNREADABLE: &str = "[UNK]";

#[derive(Debug, Deserialize)]
struct SolveResponse {
	#[serde(default)]
	status: bool,
	result: Option<String>,
}

/// Uploads the challenge as `multipart/form-data` (`file` part, PNG) and
/// reads `{status, result}` back.
pub struct RemoteSolver {
	client: reqwest::Client,
	url: String,
}

impl RemoteSolver {
	pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
		let client = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(Self { client, url: url.into() })
	}
}

#[async_trait]
impl ChallengeSolver for RemoteSolver {
	async fn solve(&self, challenge: &[u8]) -> Result<Option<String>> {
		let part = Part::bytes(challenge.to_vec())
			.file_name("image")
			.mime_str("image/png")?;
		let form = Form::new().part("file", part);

		let response = self.client.post(&self.url).multipart(form).send().await?;
		if !response.status().is_success() {
			return Err(EngineError::Solver(format!("service returned {}", response.status())));
		}

		let body: SolveResponse = response.json().await?;
		match body.result {
			Some(answer) if body.status && !answer.contains(UNREADABLE) && !answer.trim().is_empty() => {
				debug!(target = "warden.retry", "solver produced an answer");
				Ok(Some(answer.trim().to_string()))
			}
			other => {
				warn!(target = "warden.retry", status = body.status, result = ?other, "solver could not read challenge");
				Ok(None)
			}
		}
	}
}

/// Stands in when no solver service is configured; never has an answer.
pub struct UnconfiguredSolver;

#[async_trait]
impl ChallengeSolver for UnconfiguredSolver {
	async fn solve(&self, _challenge: &[u8]) -> Result<Option<String>> {
		warn!(target = "warden.retry", "no solver configured; submitting empty answer");
		Ok(None)
	}
}

/// Extracts the payload of a `data:` URL, re-encoding it as PNG.
pub fn png_from_data_url(data_url: &str) -> Result<Vec<u8>> {
	use base64::Engine as _;

	let encoded = data_url.rsplit(',').next().unwrap_or_default();
	if encoded.is_empty() {
		return Err(EngineError::Solver("empty challenge data URL".into()));
	}
	let raw = base64::engine::general_purpose::STANDARD
		.decode(encoded.trim())
		.map_err(|e| EngineError::Solver(format!("challenge is not base64: {e}")))?;
	let decoded = image::load_from_memory(&raw)?;
	let mut png = std::io::Cursor::new(Vec::new());
	decoded.write_to(&mut png, image::ImageFormat::Png)?;
	Ok(png.into_inner())
}
