//! Periodic watchdog tasks.
//!
//! Each task runs on its own interval. A tick is spawned as a separate tokio
//! task and awaited, so an error or a panic ends that tick only; the next
//! tick and the other tasks keep running.

pub mod crash;
pub mod heartbeat;
pub mod stale_login;
pub mod stuck_state;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ScheduleConfig;
use crate::engine::Engine;
use crate::error::{ErrorKind, Result};

/// How long [`Supervisor::stop`] waits for an in-flight tick.
const STOP_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
	Heartbeat,
	StaleLogin,
	StuckState,
	CrashCheck,
}

impl Task {
	pub const ALL: [Task; 4] = [Task::Heartbeat, Task::StaleLogin, Task::StuckState, Task::CrashCheck];

	pub fn name(self) -> &'static str {
		match self {
			Task::Heartbeat => "heartbeat",
			Task::StaleLogin => "stale-login",
			Task::StuckState => "stuck-state",
			Task::CrashCheck => "crash-check",
		}
	}

	pub fn period(self, schedule: &ScheduleConfig) -> Duration {
		match self {
			Task::Heartbeat => schedule.heartbeat(),
			Task::StaleLogin => schedule.stale_login(),
			Task::StuckState => schedule.stuck_state(),
			Task::CrashCheck => schedule.crash_check(),
		}
	}

	/// Runs a single tick against the engine.
	pub async fn tick(self, engine: &Engine) -> Result<()> {
		match self {
			Task::Heartbeat => heartbeat::run(engine).await,
			Task::StaleLogin => stale_login::run(engine).await,
			Task::StuckState => stuck_state::run(engine).await,
			Task::CrashCheck => crash::run(engine).await,
		}
	}
}

impl fmt::Display for Task {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Handle to the running scheduler.
pub struct Supervisor {
	stop: watch::Sender<bool>,
	tasks: Vec<(Task, JoinHandle<()>)>,
}

impl Supervisor {
	/// Starts all four tasks on the current runtime.
	pub fn spawn(engine: Arc<Engine>) -> Self {
		let (stop, _) = watch::channel(false);
		let tasks = Task::ALL
			.into_iter()
			.map(|task| {
				let period = task.period(&engine.config().schedule);
				let handle = tokio::spawn(run_loop(task, period, Arc::clone(&engine), stop.subscribe()));
				(task, handle)
			})
			.collect();
		info!(target = "warden.supervisor", "scheduler started");
		Self { stop, tasks }
	}

	/// Signals every loop to stop and waits for in-flight ticks to finish.
	pub async fn stop(self) {
		self.stop.send_replace(true);
		for (task, mut handle) in self.tasks {
			match tokio::time::timeout(STOP_GRACE, &mut handle).await {
				Ok(_) => debug!(target = "warden.supervisor", %task, "task stopped"),
				Err(_) => {
					warn!(target = "warden.supervisor", %task, "task did not stop in time; aborting");
					handle.abort();
				}
			}
		}
		info!(target = "warden.supervisor", "scheduler stopped");
	}
}

async fn run_loop(task: Task, period: Duration, engine: Arc<Engine>, mut stop: watch::Receiver<bool>) {
	let mut ticker = tokio::time::interval(period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	debug!(target = "warden.supervisor", %task, period_ms = period.as_millis() as u64, "task scheduled");

	loop {
		tokio::select! {
			_ = ticker.tick() => {}
			changed = stop.changed() => {
				if changed.is_err() || *stop.borrow() {
					break;
				}
				continue;
			}
		}

		let engine = Arc::clone(&engine);
		let tick = tokio::spawn(async move { task.tick(&engine).await });
		match tick.await {
			Ok(Ok(())) => debug!(target = "warden.supervisor", %task, "tick finished"),
			Ok(Err(err)) => match err.kind() {
				ErrorKind::Transient => warn!(target = "warden.supervisor", %task, error = %err, "tick failed"),
				kind => error!(target = "warden.supervisor", %task, ?kind, error = %err, "tick failed"),
			},
			Err(join) if join.is_panic() => error!(target = "warden.supervisor", %task, "tick panicked"),
			Err(join) => warn!(target = "warden.supervisor", %task, error = %join, "tick cancelled"),
		}
	}
}
