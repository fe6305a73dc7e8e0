//! Ownership of the single browser session.
//!
//! [`SessionLifecycleManager`] is the only component that creates or
//! destroys the platform, browser and page handles. Everyone else borrows
//! the page through [`SessionLifecycleManager::page`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use warden_protocol::{ExternalStatus, Lifecycle};
use warden_runtime::{Browser, Driver, LaunchOptions, Page, Platform};

use crate::config::{RestartConfig, TimeoutConfig};
use crate::error::{EngineError, Result};
use crate::state::EngineStateStore;

/// Observable state of the session resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
	Uninitialized,
	Active,
	/// Handles exist but the browser or page is gone.
	Crashed,
}

/// Result of a [`SessionLifecycleManager::restart`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
	/// Lifecycle was not `CRASH`, or another restart was already running.
	Skipped,
	Recovered,
	/// Lifecycle is left at `CRASH` for the next crash check.
	Failed,
}

struct Session {
	platform: Arc<dyn Platform>,
	browser: Arc<dyn Browser>,
	page: Arc<dyn Page>,
}

pub struct SessionLifecycleManager {
	driver: Arc<dyn Driver>,
	launch: LaunchOptions,
	entry_url: String,
	timeouts: TimeoutConfig,
	cooldowns: RestartConfig,
	state: Arc<EngineStateStore>,
	session: Mutex<Option<Session>>,
	rebuild: tokio::sync::Mutex<()>,
}

impl SessionLifecycleManager {
	pub fn new(
		driver: Arc<dyn Driver>,
		launch: LaunchOptions,
		entry_url: impl Into<String>,
		timeouts: TimeoutConfig,
		cooldowns: RestartConfig,
		state: Arc<EngineStateStore>,
	) -> Self {
		Self {
			driver,
			launch,
			entry_url: entry_url.into(),
			timeouts,
			cooldowns,
			state,
			session: Mutex::new(None),
			rebuild: tokio::sync::Mutex::new(()),
		}
	}

	pub fn entry_url(&self) -> &str {
		&self.entry_url
	}

	/// Allocates a fresh session, tearing down any live one first.
	///
	/// On failure the engine is marked `CRASH`/`LOGIN_ERROR` and nothing
	/// partially acquired is kept.
	pub async fn init(&self) -> Result<()> {
		if self.session.lock().is_some() {
			info!(target = "warden.session", "init: releasing existing session");
			self.release().await;
		}

		match self.allocate().await {
			Ok(session) => {
				*self.session.lock() = Some(session);
				info!(target = "warden.session", "session allocated");
				Ok(())
			}
			Err(err) => {
				error!(target = "warden.session", error = %err, "session allocation failed");
				self.state.set_outcome(Lifecycle::Crash, ExternalStatus::LoginError);
				Err(err)
			}
		}
	}

	async fn allocate(&self) -> Result<Session> {
		let platform: Arc<dyn Platform> = Arc::from(self.driver.start().await?);

		let browser: Arc<dyn Browser> = match platform.launch(&self.launch).await {
			Ok(browser) => Arc::from(browser),
			Err(err) => {
				release_step("platform", platform.close().await);
				return Err(err.into());
			}
		};

		let page = match browser.new_page().await {
			Ok(page) => page,
			Err(err) => {
				release_step("browser", browser.close().await);
				release_step("platform", platform.close().await);
				return Err(err.into());
			}
		};

		Ok(Session { platform, browser, page })
	}

	/// Releases page, browser and platform in that order.
	///
	/// Every step runs even if an earlier one failed; failures are logged and
	/// returned.
	pub async fn release(&self) -> Vec<EngineError> {
		let taken = self.session.lock().take();
		let Some(session) = taken else {
			return Vec::new();
		};

		let mut failures = Vec::new();
		for (handle, result) in [
			("page", session.page.close().await),
			("browser", session.browser.close().await),
			("platform", session.platform.close().await),
		] {
			if let Err(source) = result {
				warn!(target = "warden.session", handle, error = %source, "release failed");
				failures.push(EngineError::Teardown { handle, source });
			} else {
				debug!(target = "warden.session", handle, "released");
			}
		}
		failures
	}

	/// Rebuilds the session when the engine is crashed.
	///
	/// Never returns an error: the outcome is visible in the engine state.
	pub async fn restart(&self) -> RestartOutcome {
		let Ok(_rebuild) = self.rebuild.try_lock() else {
			debug!(target = "warden.session", "restart already in progress");
			return RestartOutcome::Skipped;
		};

		let lifecycle = self.state.lifecycle();
		if lifecycle != Lifecycle::Crash {
			info!(target = "warden.session", %lifecycle, "restart skipped: engine not crashed");
			return RestartOutcome::Skipped;
		}

		info!(target = "warden.session", "restart: draining in-flight work");
		tokio::time::sleep(self.cooldowns.drain_cooldown()).await;

		let failures = self.release().await;
		if !failures.is_empty() {
			warn!(target = "warden.session", count = failures.len(), "restart: teardown finished with failures");
		}

		tokio::time::sleep(self.cooldowns.settle_cooldown()).await;

		if self.init().await.is_err() {
			self.state.set_lifecycle(Lifecycle::Crash);
			return RestartOutcome::Failed;
		}

		if let Err(err) = self.navigate_entry().await {
			error!(target = "warden.session", error = %err, "restart: entry navigation failed");
			self.state.set_lifecycle(Lifecycle::Crash);
			return RestartOutcome::Failed;
		}

		match self.state.transition(&[Lifecycle::Crash], Lifecycle::Initial) {
			Ok(_) => {
				self.state.set_external_status(ExternalStatus::None);
				info!(target = "warden.session", "restart complete");
				RestartOutcome::Recovered
			}
			Err(err) => {
				warn!(target = "warden.session", error = %err, "restart complete but lifecycle moved meanwhile");
				RestartOutcome::Recovered
			}
		}
	}

	/// Cheap liveness probe: handles present, browser connected, page open.
	pub async fn is_alive(&self) -> bool {
		let handles = self
			.session
			.lock()
			.as_ref()
			.map(|s| (Arc::clone(&s.browser), Arc::clone(&s.page)));
		match handles {
			Some((browser, page)) => browser.is_connected().await && !page.is_closed().await,
			None => false,
		}
	}

	pub async fn phase(&self) -> SessionPhase {
		if self.session.lock().is_none() {
			SessionPhase::Uninitialized
		} else if self.is_alive().await {
			SessionPhase::Active
		} else {
			SessionPhase::Crashed
		}
	}

	pub fn is_allocated(&self) -> bool {
		self.session.lock().is_some()
	}

	pub fn page(&self) -> Result<Arc<dyn Page>> {
		self.session
			.lock()
			.as_ref()
			.map(|s| Arc::clone(&s.page))
			.ok_or(EngineError::NoSession)
	}

	pub async fn navigate_entry(&self) -> Result<()> {
		let page = self.page()?;
		page.navigate(&self.entry_url, self.timeouts.navigation()).await?;
		Ok(())
	}

	pub async fn reload(&self) -> Result<()> {
		let page = self.page()?;
		page.reload(self.timeouts.navigation()).await?;
		Ok(())
	}

	pub async fn screenshot(&self) -> Result<Vec<u8>> {
		let page = self.page()?;
		Ok(page.screenshot(self.timeouts.screenshot()).await?)
	}

	pub async fn shutdown(&self) {
		let failures = self.release().await;
		info!(target = "warden.session", failures = failures.len(), "session shut down");
	}
}

fn release_step(handle: &'static str, result: warden_runtime::Result<()>) {
	if let Err(err) = result {
		warn!(target = "warden.session", handle, error = %err, "release of partial session failed");
	}
}
