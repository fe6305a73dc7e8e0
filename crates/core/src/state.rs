//! Shared engine state record.
//!
//! One [`EngineStateStore`] exists per engine. Every write replaces the
//! whole record under a mutex and publishes the new snapshot on a watch
//! channel, so readers never see a half-applied change.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_protocol::{EngineSnapshot, ExternalStatus, Lifecycle, now_ms};

use crate::error::{EngineError, Result};

/// Activity label used when nothing is in flight.
pub const NO_ACTIVITY: &str = "NONE";

/// Proof that a caller moved the lifecycle itself; see [`EngineStateStore::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Claim {
	generation: u64,
}

#[derive(Debug, Default)]
struct Record {
	snapshot: EngineSnapshot,
	/// Bumped on every lifecycle write.
	generation: u64,
}

impl Record {
	fn write_lifecycle(&mut self, lifecycle: Lifecycle) {
		if self.snapshot.lifecycle != lifecycle {
			info!(target = "warden.state", from = %self.snapshot.lifecycle, to = %lifecycle, "lifecycle changed");
		}
		self.snapshot.lifecycle = lifecycle;
		self.snapshot.last_update = now_ms();
		self.generation += 1;
	}
}

#[derive(Debug)]
pub struct EngineStateStore {
	inner: Mutex<Record>,
	tx: watch::Sender<EngineSnapshot>,
}

impl Default for EngineStateStore {
	fn default() -> Self {
		Self::new()
	}
}

impl EngineStateStore {
	pub fn new() -> Self {
		let record = Record::default();
		let (tx, _) = watch::channel(record.snapshot.clone());
		Self {
			inner: Mutex::new(record),
			tx,
		}
	}

	pub fn get(&self) -> EngineSnapshot {
		self.inner.lock().snapshot.clone()
	}

	pub fn lifecycle(&self) -> Lifecycle {
		self.inner.lock().snapshot.lifecycle
	}

	pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
		self.tx.subscribe()
	}

	/// Time since the last lifecycle or activity change.
	pub fn elapsed(&self) -> Duration {
		let last = self.inner.lock().snapshot.last_update;
		Duration::from_millis(now_ms().saturating_sub(last))
	}

	// Publishing under the lock keeps the watch channel in write order.
	fn update<T>(&self, apply: impl FnOnce(&mut Record) -> T) -> T {
		let mut record = self.inner.lock();
		let out = apply(&mut record);
		self.tx.send_replace(record.snapshot.clone());
		out
	}

	/// Unconditional write; prefer [`Self::transition`] wherever the caller
	/// acted on a value it read earlier.
	pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
		self.update(|record| record.write_lifecycle(lifecycle));
	}

	pub fn set_external_status(&self, status: ExternalStatus) {
		self.update(|record| {
			let state = &mut record.snapshot;
			if state.external_status != status {
				info!(target = "warden.state", from = %state.external_status, to = %status, "external status changed");
			}
			state.external_status = status;
			state.last_update = now_ms();
		});
	}

	pub fn set_activity(&self, label: impl Into<String>) {
		let label = label.into();
		self.update(|record| {
			debug!(target = "warden.state", activity = %label, "activity changed");
			record.snapshot.current_activity = label;
			record.snapshot.last_update = now_ms();
		});
	}

	/// Overrides the timestamp; watchdogs use it to restart their clocks.
	pub fn set_last_update(&self, millis: u64) {
		self.update(|record| record.snapshot.last_update = millis);
	}

	pub fn touch(&self) {
		self.set_last_update(now_ms());
	}

	/// Sets lifecycle to `to` only if it is currently one of `from`.
	pub fn transition(&self, from: &[Lifecycle], to: Lifecycle) -> Result<Lifecycle> {
		self.compare_and_set(from, to).map(|(previous, _)| previous)
	}

	/// Like [`Self::transition`], but returns a [`Claim`] that stays valid
	/// until anyone else writes the lifecycle.
	pub fn claim(&self, from: &[Lifecycle], to: Lifecycle) -> Result<Claim> {
		self.compare_and_set(from, to).map(|(_, claim)| claim)
	}

	fn compare_and_set(&self, from: &[Lifecycle], to: Lifecycle) -> Result<(Lifecycle, Claim)> {
		self.update(|record| {
			let current = record.snapshot.lifecycle;
			if !from.contains(&current) {
				return Err(EngineError::InvalidTransition {
					expected: from.to_vec(),
					actual: current,
				});
			}
			record.write_lifecycle(to);
			Ok((
				current,
				Claim {
					generation: record.generation,
				},
			))
		})
	}

	/// Ends a claimed phase: applies `to` (and `status`) and clears the
	/// activity only if the lifecycle was not written since `claim`.
	///
	/// A superseded claim still clears the activity when nobody is
	/// `PROCESSING`, so an abandoned label does not linger.
	pub fn release(&self, claim: Claim, to: Lifecycle, status: Option<ExternalStatus>) -> bool {
		self.update(|record| {
			let owned = record.generation == claim.generation;
			if owned {
				record.write_lifecycle(to);
				if let Some(status) = status {
					if record.snapshot.external_status != status {
						info!(
							target = "warden.state",
							from = %record.snapshot.external_status,
							to = %status,
							"external status changed"
						);
					}
					record.snapshot.external_status = status;
				}
			}
			if owned || record.snapshot.lifecycle != Lifecycle::Processing {
				record.snapshot.current_activity = NO_ACTIVITY.to_string();
			}
			owned
		})
	}

	/// Lifecycle and external status in one write.
	pub fn set_outcome(&self, lifecycle: Lifecycle, status: ExternalStatus) {
		self.update(|record| {
			if record.snapshot.external_status != status {
				info!(target = "warden.state", from = %record.snapshot.external_status, to = %status, "external status changed");
			}
			record.write_lifecycle(lifecycle);
			record.snapshot.external_status = status;
		});
	}

	/// Forces `CRASH` from any state.
	pub fn crash(&self, reason: &str) {
		warn!(target = "warden.state", %reason, "engine marked crashed");
		self.set_lifecycle(Lifecycle::Crash);
	}

	/// Writes every published snapshot to `path` until the store is dropped.
	pub fn spawn_persister(&self, path: PathBuf) -> JoinHandle<()> {
		let mut rx = self.subscribe();
		tokio::spawn(async move {
			while rx.changed().await.is_ok() {
				let snapshot = rx.borrow_and_update().clone();
				if let Err(err) = write_snapshot(&path, &snapshot).await {
					warn!(target = "warden.state", path = %path.display(), error = %err, "snapshot write failed");
				}
			}
		})
	}
}

async fn write_snapshot(path: &std::path::Path, snapshot: &EngineSnapshot) -> Result<()> {
	let body = serde_json::to_vec_pretty(snapshot)?;
	let tmp = path.with_extension("tmp");
	tokio::fs::write(&tmp, body).await?;
	tokio::fs::rename(&tmp, path).await?;
	Ok(())
}

/// Reads a snapshot left by a previous process, if any.
pub async fn read_snapshot(path: &std::path::Path) -> Option<EngineSnapshot> {
	let raw = tokio::fs::read(path).await.ok()?;
	match serde_json::from_slice(&raw) {
		Ok(snapshot) => Some(snapshot),
		Err(err) => {
			warn!(target = "warden.state", path = %path.display(), error = %err, "ignoring unreadable snapshot");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[test]
	fn starts_initial_with_no_activity() {
		let store = EngineStateStore::new();
		let state = store.get();
		assert_eq!(state.lifecycle, Lifecycle::Initial);
		assert_eq!(state.external_status, ExternalStatus::None);
		assert_eq!(state.current_activity, NO_ACTIVITY);
	}

	#[test]
	fn setters_stamp_last_update() {
		let store = EngineStateStore::new();
		store.set_last_update(0);
		store.set_activity("batch 7");
		assert!(store.get().last_update > 0);

		store.set_last_update(0);
		store.set_lifecycle(Lifecycle::Idle);
		assert!(store.get().last_update > 0);
	}

	#[test]
	fn transition_only_applies_from_expected_states() {
		let store = EngineStateStore::new();
		store.set_lifecycle(Lifecycle::Crash);

		let err = store.transition(&[Lifecycle::Processing], Lifecycle::Idle).unwrap_err();
		assert!(matches!(err, EngineError::InvalidTransition { actual: Lifecycle::Crash, .. }));
		assert_eq!(store.lifecycle(), Lifecycle::Crash);

		let previous = store.transition(&[Lifecycle::Crash], Lifecycle::Initial).unwrap();
		assert_eq!(previous, Lifecycle::Crash);
		assert_eq!(store.lifecycle(), Lifecycle::Initial);
	}

	#[test]
	fn superseded_claim_cannot_release() {
		let store = EngineStateStore::new();
		store.set_lifecycle(Lifecycle::Idle);

		let first = store.claim(&[Lifecycle::Idle], Lifecycle::Processing).unwrap();
		store.set_activity("FIRST");
		store.transition(&[Lifecycle::Processing], Lifecycle::Idle).unwrap();
		let second = store.claim(&[Lifecycle::Idle], Lifecycle::Processing).unwrap();
		store.set_activity("SECOND");

		assert!(!store.release(first, Lifecycle::Idle, Some(ExternalStatus::LoginError)));
		let state = store.get();
		assert_eq!(state.lifecycle, Lifecycle::Processing);
		assert_eq!(state.current_activity, "SECOND");
		assert_eq!(state.external_status, ExternalStatus::None);

		assert!(store.release(second, Lifecycle::Idle, Some(ExternalStatus::LoginSuccess)));
		let state = store.get();
		assert_eq!(state.lifecycle, Lifecycle::Idle);
		assert_eq!(state.current_activity, NO_ACTIVITY);
		assert_eq!(state.external_status, ExternalStatus::LoginSuccess);
	}

	#[test]
	fn superseded_claim_clears_abandoned_activity() {
		let store = EngineStateStore::new();
		store.set_lifecycle(Lifecycle::Idle);
		let claim = store.claim(&[Lifecycle::Idle], Lifecycle::Processing).unwrap();
		store.set_activity("SCORING");
		store.crash("terminal screen");

		assert!(!store.release(claim, Lifecycle::Idle, None));
		let state = store.get();
		assert_eq!(state.lifecycle, Lifecycle::Crash);
		assert_eq!(state.current_activity, NO_ACTIVITY);
	}

	#[test]
	fn concurrent_writers_never_expose_partial_state() {
		let store = Arc::new(EngineStateStore::new());
		let writers: Vec<_> = (0..8)
			.map(|i| {
				let store = Arc::clone(&store);
				std::thread::spawn(move || {
					for n in 0..500 {
						let phase = Lifecycle::ALL[(i + n) % Lifecycle::ALL.len()];
						store.set_lifecycle(phase);
						let _ = store.transition(&[Lifecycle::Idle], Lifecycle::Processing);
					}
				})
			})
			.collect();
		for _ in 0..2000 {
			assert!(Lifecycle::ALL.contains(&store.get().lifecycle));
		}
		for writer in writers {
			writer.join().unwrap();
		}
		assert!(Lifecycle::ALL.contains(&store.lifecycle()));
	}

	#[tokio::test]
	async fn subscribers_observe_latest_snapshot() {
		let store = EngineStateStore::new();
		let mut rx = store.subscribe();
		store.set_outcome(Lifecycle::Idle, ExternalStatus::LoginSuccess);
		rx.changed().await.unwrap();
		let seen = rx.borrow().clone();
		assert_eq!(seen.lifecycle, Lifecycle::Idle);
		assert_eq!(seen.external_status, ExternalStatus::LoginSuccess);
	}

	#[tokio::test]
	async fn persister_writes_snapshot_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state.json");
		let store = Arc::new(EngineStateStore::new());
		let task = store.spawn_persister(path.clone());

		store.set_outcome(Lifecycle::Idle, ExternalStatus::LoginSuccess);
		let mut found = None;
		for _ in 0..50 {
			tokio::time::sleep(Duration::from_millis(20)).await;
			if let Some(snapshot) = read_snapshot(&path).await {
				found = Some(snapshot);
				break;
			}
		}
		task.abort();
		let snapshot = found.unwrap();
		assert_eq!(snapshot.lifecycle, Lifecycle::Idle);
		assert_eq!(snapshot.external_status, ExternalStatus::LoginSuccess);
	}
}
