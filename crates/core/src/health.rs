//! Process health gauges for heartbeats.

use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};

/// One sample of the process gauges, pre-rendered for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthGauges {
	pub uptime: String,
	pub cpu_usage: String,
	pub memory_usage: String,
	pub disk_free: String,
}

/// Samples this process through `sysinfo`.
///
/// CPU usage is measured between consecutive samples, so the first one
/// reads as zero.
pub struct HealthProbe {
	system: Mutex<System>,
	pid: Option<Pid>,
	started: Instant,
}

impl Default for HealthProbe {
	fn default() -> Self {
		Self::new()
	}
}

impl HealthProbe {
	pub fn new() -> Self {
		Self {
			system: Mutex::new(System::new()),
			pid: sysinfo::get_current_pid().ok(),
			started: Instant::now(),
		}
	}

	pub fn sample(&self) -> HealthGauges {
		let (uptime, cpu, memory) = {
			let mut system = self.system.lock();
			match self.pid {
				Some(pid) => {
					system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
					match system.process(pid) {
						Some(process) => (
							Duration::from_secs(process.run_time()),
							Some(process.cpu_usage()),
							Some(process.memory()),
						),
						None => (self.started.elapsed(), None, None),
					}
				}
				None => (self.started.elapsed(), None, None),
			}
		};

		HealthGauges {
			uptime: format_uptime(uptime),
			cpu_usage: cpu.map(|c| format!("{c:.2}%")).unwrap_or_else(|| "-".into()),
			memory_usage: memory.map(format_bytes).unwrap_or_else(|| "-".into()),
			disk_free: free_disk_space().map(format_bytes).unwrap_or_else(|| "-".into()),
		}
	}
}

/// Free space on the disk holding the working directory.
fn free_disk_space() -> Option<u64> {
	let cwd = std::env::current_dir().ok()?;
	let disks = Disks::new_with_refreshed_list();
	disks
		.list()
		.iter()
		.filter(|disk| cwd.starts_with(disk.mount_point()))
		.max_by_key(|disk| disk.mount_point().as_os_str().len())
		.or_else(|| disks.list().iter().find(|disk| disk.mount_point() == Path::new("/")))
		.map(|disk| disk.available_space())
}

const SI_UNITS: [(&str, u64); 6] = [
	("EB", 1_000_000_000_000_000_000),
	("PB", 1_000_000_000_000_000),
	("TB", 1_000_000_000_000),
	("GB", 1_000_000_000),
	("MB", 1_000_000),
	("KB", 1_000),
];

/// Renders a byte count in SI units with at most two decimals ("1.5 GB").
pub fn format_bytes(bytes: u64) -> String {
	for (unit, base) in SI_UNITS {
		if bytes >= base {
			return format!("{} {unit}", trim_decimals(bytes as f64 / base as f64));
		}
	}
	format!("{bytes} B")
}

fn trim_decimals(value: f64) -> String {
	let fixed = format!("{value:.2}");
	fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Renders an uptime as "3h 12m 5s", with a day component once it applies.
pub fn format_uptime(uptime: Duration) -> String {
	let total = uptime.as_secs();
	let (days, hours, minutes, seconds) = (total / 86_400, total / 3_600 % 24, total / 60 % 60, total % 60);
	if days > 0 {
		format!("{days}d {hours}h {minutes}m {seconds}s")
	} else {
		format!("{hours}h {minutes}m {seconds}s")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bytes_render_in_si_units() {
		assert_eq!(format_bytes(0), "0 B");
		assert_eq!(format_bytes(999), "999 B");
		assert_eq!(format_bytes(1_000), "1 KB");
		assert_eq!(format_bytes(1_234_567), "1.23 MB");
		assert_eq!(format_bytes(1_500_000_000), "1.5 GB");
		assert_eq!(format_bytes(2_000_000_000_000), "2 TB");
	}

	#[test]
	fn uptime_renders_hours_minutes_seconds() {
		assert_eq!(format_uptime(Duration::from_secs(0)), "0h 0m 0s");
		assert_eq!(format_uptime(Duration::from_secs(3 * 3600 + 12 * 60 + 5)), "3h 12m 5s");
		assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m 1s");
	}

	#[test]
	fn sample_produces_every_gauge() {
		let probe = HealthProbe::new();
		let gauges = probe.sample();
		assert!(gauges.uptime.ends_with('s'));
		assert!(gauges.cpu_usage.ends_with('%') || gauges.cpu_usage == "-");
		assert!(!gauges.memory_usage.is_empty());
	}
}
