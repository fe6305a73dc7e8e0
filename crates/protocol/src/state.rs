//! Engine lifecycle and status-query types.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Authoritative worker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lifecycle {
	#[default]
	Initial,
	Idle,
	Processing,
	Crash,
}

impl Lifecycle {
	pub const ALL: [Lifecycle; 4] = [Lifecycle::Initial, Lifecycle::Idle, Lifecycle::Processing, Lifecycle::Crash];

	pub fn as_str(self) -> &'static str {
		match self {
			Lifecycle::Initial => "INITIAL",
			Lifecycle::Idle => "IDLE",
			Lifecycle::Processing => "PROCESSING",
			Lifecycle::Crash => "CRASH",
		}
	}
}

impl fmt::Display for Lifecycle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Lifecycle {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Lifecycle::ALL
			.into_iter()
			.find(|phase| phase.as_str().eq_ignore_ascii_case(s.trim()))
			.ok_or_else(|| format!("unknown lifecycle '{s}'"))
	}
}

/// Outcome of the most recent login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalStatus {
	#[default]
	None,
	LoginError,
	LoginSuccess,
}

impl ExternalStatus {
	pub const ALL: [ExternalStatus; 3] = [ExternalStatus::None, ExternalStatus::LoginError, ExternalStatus::LoginSuccess];

	pub fn as_str(self) -> &'static str {
		match self {
			ExternalStatus::None => "NONE",
			ExternalStatus::LoginError => "LOGIN_ERROR",
			ExternalStatus::LoginSuccess => "LOGIN_SUCCESS",
		}
	}
}

impl fmt::Display for ExternalStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for ExternalStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ExternalStatus::ALL
			.into_iter()
			.find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
			.ok_or_else(|| format!("unknown external status '{s}'"))
	}
}

/// Read-only snapshot of the engine state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
	pub lifecycle: Lifecycle,
	pub external_status: ExternalStatus,
	pub current_activity: String,
	/// Unix epoch milliseconds of the last lifecycle or activity change.
	pub last_update: u64,
}

impl Default for EngineSnapshot {
	fn default() -> Self {
		Self {
			lifecycle: Lifecycle::Initial,
			external_status: ExternalStatus::None,
			current_activity: "NONE".to_string(),
			last_update: now_ms(),
		}
	}
}

/// Milliseconds since the Unix epoch, saturating to zero for pre-epoch clocks.
pub fn now_ms() -> u64 {
	to_ms(SystemTime::now())
}

pub fn to_ms(time: SystemTime) -> u64 {
	time.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
