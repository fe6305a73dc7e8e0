//! Outbound heartbeat payload.

use serde::{Deserialize, Serialize};

use crate::state::Lifecycle;

/// Coarse availability reported to the remote collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
	Up,
	Down,
}

/// Periodic health report.
///
/// Gauges are pre-rendered strings ("1.5 GB", "3h 12m 5s") and are omitted
/// entirely in the shutdown notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
	pub code: String,
	pub status: ReportStatus,
	pub uptime: Option<String>,
	pub cpu_usage: Option<String>,
	pub memory_usage: Option<String>,
	pub pool_active: Option<u32>,
	pub pool_total: Option<u32>,
	pub disk_free: Option<String>,
	pub current_activity: String,
	pub lifecycle: Lifecycle,
	pub last_update: u64,
}
