//! Error types for driver operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failures surfaced by a browser driver.
#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("Browser launch failed: {0}")]
	Launch(String),

	#[error("Connection error: {0}")]
	Connection(String),

	#[error("Protocol error in {method}: {message}")]
	Protocol { method: String, message: String },

	#[error("Timeout after {ms}ms waiting for {condition}")]
	Timeout { ms: u64, condition: String },

	#[error("Target page, context or browser has been closed")]
	TargetClosed,

	#[error("Element not found: {0}")]
	ElementNotFound(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("WebSocket error: {0}")]
	WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl RuntimeError {
	/// Timeouts and closed targets are expected on an unreliable target and
	/// are classified, not escalated.
	pub fn is_transient(&self) -> bool {
		matches!(self, RuntimeError::Timeout { .. } | RuntimeError::TargetClosed | RuntimeError::ElementNotFound(_))
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for RuntimeError {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		RuntimeError::WebSocket(Box::new(err))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeouts_and_closed_targets_are_transient() {
		let timeout = RuntimeError::Timeout {
			ms: 5000,
			condition: "Page.captureScreenshot".into(),
		};
		assert!(timeout.is_transient());
		assert!(RuntimeError::TargetClosed.is_transient());
		assert!(!RuntimeError::Launch("no chrome".into()).is_transient());
		assert_eq!(timeout.to_string(), "Timeout after 5000ms waiting for Page.captureScreenshot");
	}
}
