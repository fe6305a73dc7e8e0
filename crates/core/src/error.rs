//! Engine error type and its closed classification.

use std::path::PathBuf;

use thiserror::Error;
use warden_protocol::Lifecycle;
use warden_runtime::RuntimeError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// How a failure should be treated by whoever catches it.
///
/// Supervisor tasks switch on this to pick a log level and a recovery
/// action instead of inspecting concrete error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Timeouts and resources closed mid-call; treated as "no observable change".
	Transient,
	/// The screen matched a known failure signature.
	Classified,
	/// A bounded retry ran out of attempts.
	Exhausted,
	Unexpected,
	/// A resource release failed during restart or shutdown.
	Teardown,
}

#[derive(Debug, Error)]
pub enum EngineError {
	#[error(transparent)]
	Driver(#[from] RuntimeError),

	#[error("no live browser session")]
	NoSession,

	#[error("screen classified as {0}")]
	Screen(String),

	#[error("gave up after {attempts} attempts")]
	Exhausted { attempts: u32 },

	#[error("lifecycle is {actual}, expected one of {expected:?}")]
	InvalidTransition { expected: Vec<Lifecycle>, actual: Lifecycle },

	#[error("failed to release {handle}: {source}")]
	Teardown {
		handle: &'static str,
		#[source]
		source: RuntimeError,
	},

	#[error("challenge solver: {0}")]
	Solver(String),

	#[error("remote reporter: {0}")]
	Report(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("image decode: {0}")]
	Image(#[from] image::ImageError),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("background task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

impl EngineError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			EngineError::Driver(err) if err.is_transient() => ErrorKind::Transient,
			EngineError::NoSession => ErrorKind::Transient,
			EngineError::Http(err) if err.is_timeout() || err.is_connect() => ErrorKind::Transient,
			EngineError::Screen(_) => ErrorKind::Classified,
			EngineError::Exhausted { .. } => ErrorKind::Exhausted,
			EngineError::Teardown { .. } => ErrorKind::Teardown,
			_ => ErrorKind::Unexpected,
		}
	}

	pub fn is_transient(&self) -> bool {
		self.kind() == ErrorKind::Transient
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn driver_timeouts_classify_as_transient() {
		let err = EngineError::from(RuntimeError::Timeout {
			ms: 5000,
			condition: "screenshot".into(),
		});
		assert_eq!(err.kind(), ErrorKind::Transient);

		let err = EngineError::from(RuntimeError::Launch("missing".into()));
		assert_eq!(err.kind(), ErrorKind::Unexpected);
	}

	#[test]
	fn taxonomy_covers_screen_and_exhaustion() {
		assert_eq!(EngineError::Screen("SESS1".into()).kind(), ErrorKind::Classified);
		assert_eq!(EngineError::Exhausted { attempts: 3 }.kind(), ErrorKind::Exhausted);
		let teardown = EngineError::Teardown {
			handle: "page",
			source: RuntimeError::TargetClosed,
		};
		assert_eq!(teardown.kind(), ErrorKind::Teardown);
		assert_eq!(teardown.to_string(), "failed to release page: Target page, context or browser has been closed");
	}
}
