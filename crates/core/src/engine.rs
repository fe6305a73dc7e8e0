//! Engine facade shared by the supervisor and the control surface.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use warden_protocol::{EngineSnapshot, ExternalStatus, HeartbeatPayload, Lifecycle, PingResponse, ReportStatus};
use warden_runtime::Driver;
use warden_runtime::cdp::CdpDriver;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::health::HealthProbe;
use crate::login::{FormLogin, LoginFlow, LoginOutcome};
use crate::reporter::{DisabledReporter, HttpReporter, RemoteReporter};
use crate::retry::{ChallengeSolver, RetryPolicy, RetrySolver};
use crate::screen::{ScreenAction, ScreenClassifier, ScreenMatch, ScreenPolicy, TemplateClassifier, classify_blocking};
use crate::session::{RestartOutcome, SessionLifecycleManager};
use crate::solver::{RemoteSolver, UnconfiguredSolver};
use crate::state::{Claim, EngineStateStore};

const IDLE_OR_INITIAL: &[Lifecycle] = &[Lifecycle::Initial, Lifecycle::Idle];
const ANY_BUT_CRASH: &[Lifecycle] = &[Lifecycle::Initial, Lifecycle::Idle, Lifecycle::Processing];

/// Why an on-demand call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
	Busy,
	Crashed,
}

impl fmt::Display for Rejection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Rejection::Busy => f.write_str("engine busy"),
			Rejection::Crashed => f.write_str("engine crashed"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
	LoggedIn,
	AlreadyLoggedIn,
	Rejected(Rejection),
	/// A known non-login screen was showing; the page was reloaded.
	Deferred(String),
	Failed(String),
}

impl LoginResult {
	pub fn is_success(&self) -> bool {
		matches!(self, LoginResult::LoggedIn | LoginResult::AlreadyLoggedIn)
	}
}

impl fmt::Display for LoginResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LoginResult::LoggedIn => f.write_str("login success"),
			LoginResult::AlreadyLoggedIn => f.write_str("already logged in"),
			LoginResult::Rejected(rejection) => write!(f, "login rejected: {rejection}"),
			LoginResult::Deferred(screen) => write!(f, "login deferred: screen {screen}"),
			LoginResult::Failed(reason) => write!(f, "login failed: {reason}"),
		}
	}
}

/// Result of [`Engine::restart_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRestart {
	pub restart: RestartOutcome,
	/// Present when the rebuild succeeded and a login was attempted.
	pub login: Option<LoginResult>,
}

/// Holds the engine in `PROCESSING`; dropping it restores `IDLE`.
#[must_use = "dropping the guard ends the workflow"]
pub struct WorkflowGuard<'a> {
	engine: &'a Engine,
	claim: Claim,
}

impl WorkflowGuard<'_> {
	pub fn set_activity(&self, label: &str) {
		self.engine.state.set_activity(label);
	}

	/// Marks the engine crashed; the drop will leave `CRASH` in place.
	pub fn crash(self, reason: &str) {
		self.engine.state.crash(reason);
	}
}

impl Drop for WorkflowGuard<'_> {
	fn drop(&mut self) {
		if !self.engine.state.release(self.claim, Lifecycle::Idle, None) {
			debug!(target = "warden.state", "lifecycle changed under the workflow; IDLE not restored");
		}
		self.engine.in_flight.fetch_sub(1, Ordering::SeqCst);
	}
}

pub struct EngineBuilder {
	config: EngineConfig,
	driver: Option<Arc<dyn Driver>>,
	classifier: Option<Arc<dyn ScreenClassifier>>,
	solver: Option<Arc<dyn ChallengeSolver>>,
	login: Option<Arc<dyn LoginFlow>>,
	reporter: Option<Arc<dyn RemoteReporter>>,
}

impl EngineBuilder {
	pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
		self.driver = Some(driver);
		self
	}

	pub fn classifier(mut self, classifier: Arc<dyn ScreenClassifier>) -> Self {
		self.classifier = Some(classifier);
		self
	}

	pub fn solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
		self.solver = Some(solver);
		self
	}

	pub fn login_flow(mut self, login: Arc<dyn LoginFlow>) -> Self {
		self.login = Some(login);
		self
	}

	pub fn reporter(mut self, reporter: Arc<dyn RemoteReporter>) -> Self {
		self.reporter = Some(reporter);
		self
	}

	/// Fills every unset collaborator from the configuration.
	pub fn build(self) -> Result<Engine> {
		let config = self.config;
		let state = Arc::new(EngineStateStore::new());
		let screens = ScreenPolicy::from_config(&config.screens);

		let classifier = match self.classifier {
			Some(classifier) => classifier,
			None => Arc::new(TemplateClassifier::load(&config.screens.signatures)?),
		};

		let login = match self.login {
			Some(login) => login,
			None => {
				let solver: Arc<dyn ChallengeSolver> = match (self.solver, &config.solver.url) {
					(Some(solver), _) => solver,
					(None, Some(url)) => Arc::new(RemoteSolver::new(url, config.timeouts.report())?),
					(None, None) => Arc::new(UnconfiguredSolver),
				};
				Arc::new(FormLogin::new(
					config.login.selectors.clone(),
					config.login.credentials.clone(),
					config.timeouts.clone(),
					RetryPolicy::new(
						config.login.max_challenge_attempts,
						Duration::from_millis(config.login.challenge_retry_delay_ms),
					),
					RetrySolver::new(solver),
					Arc::clone(&classifier),
					screens.clone(),
				))
			}
		};

		let reporter: Arc<dyn RemoteReporter> = match (self.reporter, &config.report.heartbeat_url) {
			(Some(reporter), _) => reporter,
			(None, Some(url)) => Arc::new(HttpReporter::new(url, config.timeouts.report())?),
			(None, None) => Arc::new(DisabledReporter),
		};

		let driver = self.driver.unwrap_or_else(|| Arc::new(CdpDriver::new()));
		let sessions = SessionLifecycleManager::new(
			driver,
			config.browser.launch_options(),
			config.engine.entry_url.clone(),
			config.timeouts.clone(),
			config.restart.clone(),
			Arc::clone(&state),
		);

		Ok(Engine {
			config,
			state,
			sessions,
			classifier,
			screens,
			login,
			reporter,
			health: HealthProbe::new(),
			login_lock: tokio::sync::Mutex::new(()),
			in_flight: AtomicU32::new(0),
		})
	}
}

pub struct Engine {
	config: EngineConfig,
	state: Arc<EngineStateStore>,
	sessions: SessionLifecycleManager,
	classifier: Arc<dyn ScreenClassifier>,
	screens: ScreenPolicy,
	login: Arc<dyn LoginFlow>,
	reporter: Arc<dyn RemoteReporter>,
	health: HealthProbe,
	login_lock: tokio::sync::Mutex<()>,
	in_flight: AtomicU32,
}

impl Engine {
	pub fn builder(config: EngineConfig) -> EngineBuilder {
		EngineBuilder {
			config,
			driver: None,
			classifier: None,
			solver: None,
			login: None,
			reporter: None,
		}
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn state(&self) -> &Arc<EngineStateStore> {
		&self.state
	}

	pub fn sessions(&self) -> &SessionLifecycleManager {
		&self.sessions
	}

	pub fn screens(&self) -> &ScreenPolicy {
		&self.screens
	}

	pub fn reporter(&self) -> &Arc<dyn RemoteReporter> {
		&self.reporter
	}

	pub fn status(&self) -> EngineSnapshot {
		self.state.get()
	}

	pub fn ping(&self) -> PingResponse {
		PingResponse {
			name: self.config.engine.name.clone(),
			endpoint: self.config.engine.endpoint.clone(),
		}
	}

	/// Allocates the session and attempts the first login.
	pub async fn start(&self) {
		if let Err(err) = self.sessions.init().await {
			error!(target = "warden.session", error = %err, "initial session allocation failed; crash check will retry");
			return;
		}
		let result = self.login().await;
		info!(target = "warden.session", %result, "initial login finished");
	}

	/// Accepts an on-demand call only from `IDLE`.
	pub fn begin_workflow(&self, label: &str) -> std::result::Result<WorkflowGuard<'_>, Rejection> {
		match self.state.claim(&[Lifecycle::Idle], Lifecycle::Processing) {
			Ok(claim) => {
				self.in_flight.fetch_add(1, Ordering::SeqCst);
				self.state.set_activity(label);
				Ok(WorkflowGuard { engine: self, claim })
			}
			Err(EngineError::InvalidTransition { actual: Lifecycle::Crash, .. }) => Err(Rejection::Crashed),
			Err(_) => Err(Rejection::Busy),
		}
	}

	/// Snapshot of the current screen, classified. Capture failures read as
	/// "nothing recognised".
	pub async fn classify_current(&self) -> Option<ScreenMatch> {
		let snapshot = match self.sessions.screenshot().await {
			Ok(snapshot) => snapshot,
			Err(err) => {
				log_failure("screenshot", &err);
				return None;
			}
		};
		let found = classify_blocking(Arc::clone(&self.classifier), snapshot).await;
		if let Some(found) = &found {
			info!(target = "warden.screen", screen = %found.name, score = found.score, "screen recognised");
		}
		found
	}

	/// Whether the logged-in landmark is visible; any failure reads as `false`.
	pub async fn landmark_visible(&self) -> bool {
		let Ok(page) = self.sessions.page() else {
			return false;
		};
		if page.is_closed().await {
			return false;
		}
		let selector = &self.config.login.selectors.landmark;
		match page.is_visible(selector, self.config.timeouts.element()).await {
			Ok(visible) => visible,
			Err(err) => {
				log_failure("landmark probe", &EngineError::from(err));
				false
			}
		}
	}

	/// Safe to call when already logged in, including while a workflow runs.
	pub async fn login(&self) -> LoginResult {
		let Ok(_serial) = self.login_lock.try_lock() else {
			return LoginResult::Rejected(Rejection::Busy);
		};
		let current = self.state.get();
		match current.lifecycle {
			Lifecycle::Crash => return LoginResult::Rejected(Rejection::Crashed),
			Lifecycle::Processing if current.external_status == ExternalStatus::LoginSuccess => {
				return LoginResult::AlreadyLoggedIn;
			}
			Lifecycle::Processing => return LoginResult::Rejected(Rejection::Busy),
			Lifecycle::Initial | Lifecycle::Idle => {}
		}

		if !self.sessions.is_allocated() && self.sessions.init().await.is_err() {
			return LoginResult::Failed("session allocation failed".into());
		}

		if let Err(err) = self.sessions.navigate_entry().await {
			warn!(target = "warden.session", error = %err, "login: entry navigation failed");
			self.settle(IDLE_OR_INITIAL, Lifecycle::Initial, ExternalStatus::LoginError);
			return LoginResult::Failed(err.to_string());
		}

		if self.landmark_visible().await {
			self.settle(IDLE_OR_INITIAL, Lifecycle::Idle, ExternalStatus::LoginSuccess);
			return LoginResult::AlreadyLoggedIn;
		}

		let Ok(claim) = self.state.claim(IDLE_OR_INITIAL, Lifecycle::Processing) else {
			return LoginResult::Rejected(Rejection::Busy);
		};
		self.in_flight.fetch_add(1, Ordering::SeqCst);
		self.state.set_activity("LOGIN");
		let result = self.run_login(claim).await;
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
		info!(target = "warden.session", %result, "login finished");
		result
	}

	/// Runs with the lifecycle claimed as `PROCESSING`; every path ends the claim.
	async fn run_login(&self, claim: Claim) -> LoginResult {
		if let Some(found) = self.classify_current().await {
			match self.screens.action(&found.name) {
				ScreenAction::Crash => {
					let err = EngineError::Screen(found.name);
					log_failure("login", &err);
					self.state.crash(&err.to_string());
					// Superseded by the crash; only clears the activity.
					self.state.release(claim, Lifecycle::Initial, None);
					return LoginResult::Failed(err.to_string());
				}
				ScreenAction::LoginPrompt => {}
				ScreenAction::RetryChallenge | ScreenAction::Defer => {
					self.finish_login(claim, Lifecycle::Initial, None);
					self.reload_quietly().await;
					return LoginResult::Deferred(found.name);
				}
			}
		}

		let outcome = match self.sessions.page() {
			Ok(page) => self.login.login(page).await,
			Err(err) => Err(err),
		};
		match outcome {
			Ok(LoginOutcome::LoggedIn) => {
				self.finish_login(claim, Lifecycle::Idle, Some(ExternalStatus::LoginSuccess));
				LoginResult::LoggedIn
			}
			Ok(LoginOutcome::Failed(reason)) => {
				self.finish_login(claim, Lifecycle::Initial, Some(ExternalStatus::LoginError));
				self.reload_quietly().await;
				LoginResult::Failed(reason)
			}
			Err(err) => {
				log_failure("login flow", &err);
				self.finish_login(claim, Lifecycle::Initial, Some(ExternalStatus::LoginError));
				self.reload_quietly().await;
				LoginResult::Failed(err.to_string())
			}
		}
	}

	/// Applies an outcome only if the lifecycle is still one of `from`.
	fn settle(&self, from: &[Lifecycle], lifecycle: Lifecycle, status: ExternalStatus) {
		match self.state.transition(from, lifecycle) {
			Ok(_) => self.state.set_external_status(status),
			Err(err) => warn!(target = "warden.state", error = %err, "outcome not applied"),
		}
	}

	/// Applies a login outcome unless someone else wrote the lifecycle since
	/// the login claimed it.
	fn finish_login(&self, claim: Claim, lifecycle: Lifecycle, status: Option<ExternalStatus>) {
		if !self.state.release(claim, lifecycle, status) {
			warn!(target = "warden.state", to = %lifecycle, "login outcome not applied; lifecycle changed meanwhile");
		}
	}

	async fn reload_quietly(&self) {
		if let Err(err) = self.sessions.reload().await {
			log_failure("reload", &err);
		}
	}

	/// Best-effort logout; always ends in `INITIAL`/`NONE` unless crashed.
	pub async fn logout(&self) {
		let selectors = &self.config.login.selectors;
		let element = self.config.timeouts.element();
		match self.sessions.page() {
			Ok(page) => {
				let clicked = match page.is_visible(&selectors.logout_link, element).await {
					Ok(true) => page.click(&selectors.logout_link, element).await.map(|_| true),
					Ok(false) => Ok(false),
					Err(err) => Err(err),
				};
				match clicked {
					Ok(true) => {
						if let Err(err) = page.wait_for(&selectors.username, element).await {
							log_failure("logout: login form", &EngineError::from(err));
						}
					}
					Ok(false) => debug!(target = "warden.session", "logout link not visible"),
					Err(err) => log_failure("logout", &EngineError::from(err)),
				}
			}
			Err(err) => log_failure("logout", &err),
		}
		self.settle(ANY_BUT_CRASH, Lifecycle::Initial, ExternalStatus::None);
	}

	/// Logout, forced crash, full rebuild, then login.
	pub async fn restart_session(&self) -> SessionRestart {
		self.logout().await;
		self.state.crash("restart requested");
		let restart = self.sessions.restart().await;
		let login = match restart {
			RestartOutcome::Recovered => Some(self.login().await),
			RestartOutcome::Skipped | RestartOutcome::Failed => None,
		};
		SessionRestart { restart, login }
	}

	pub async fn reload_page(&self) -> Result<()> {
		self.sessions.reload().await
	}

	/// Keeps the session warm: clicks home when logged in, reloads otherwise.
	pub async fn refresh(&self) -> Result<()> {
		if self.state.lifecycle() == Lifecycle::Crash {
			debug!(target = "warden.session", "refresh skipped: crashed");
			return Ok(());
		}
		if self.landmark_visible().await {
			let page = self.sessions.page()?;
			page.click(&self.config.login.selectors.home_link, self.config.timeouts.element())
				.await?;
			debug!(target = "warden.session", "refreshed via home link");
		} else {
			self.sessions.reload().await?;
			debug!(target = "warden.session", "refreshed via reload");
		}
		Ok(())
	}

	pub async fn screenshot(&self) -> Result<Vec<u8>> {
		self.sessions.screenshot().await
	}

	/// `DOWN` when the session is gone or the engine crashed.
	pub async fn report_status(&self) -> ReportStatus {
		if self.state.lifecycle() == Lifecycle::Crash || !self.sessions.is_alive().await {
			ReportStatus::Down
		} else {
			ReportStatus::Up
		}
	}

	pub async fn heartbeat_payload(&self) -> HeartbeatPayload {
		let status = self.report_status().await;
		let gauges = self.health.sample();
		let state = self.state.get();
		HeartbeatPayload {
			code: self.config.engine.name.clone(),
			status,
			uptime: Some(gauges.uptime),
			cpu_usage: Some(gauges.cpu_usage),
			memory_usage: Some(gauges.memory_usage),
			pool_active: Some(u32::from(self.in_flight.load(Ordering::SeqCst) > 0)),
			pool_total: Some(u32::from(self.sessions.is_allocated())),
			disk_free: Some(gauges.disk_free),
			current_activity: state.current_activity,
			lifecycle: state.lifecycle,
			last_update: state.last_update,
		}
	}

	/// Reports `DOWN` with gauges omitted, bounded by the report timeout.
	pub async fn send_down(&self) {
		let state = self.state.get();
		let payload = HeartbeatPayload {
			code: self.config.engine.name.clone(),
			status: ReportStatus::Down,
			uptime: None,
			cpu_usage: None,
			memory_usage: None,
			pool_active: None,
			pool_total: None,
			disk_free: None,
			current_activity: state.current_activity,
			lifecycle: state.lifecycle,
			last_update: state.last_update,
		};
		match tokio::time::timeout(self.config.timeouts.report(), self.reporter.report(&payload)).await {
			Ok(Ok(())) => info!(target = "warden.report", "DOWN status sent"),
			Ok(Err(err)) => warn!(target = "warden.report", error = %err, "DOWN status not delivered"),
			Err(_) => warn!(target = "warden.report", "DOWN status timed out"),
		}
	}

	pub async fn shutdown(&self) {
		self.send_down().await;
		self.sessions.shutdown().await;
	}
}

/// Logs a caught failure at the level its kind calls for.
pub(crate) fn log_failure(context: &str, err: &EngineError) {
	use crate::error::ErrorKind;

	match err.kind() {
		ErrorKind::Transient => debug!(target = "warden.session", %context, error = %err, "transient failure"),
		ErrorKind::Teardown => warn!(target = "warden.session", %context, error = %err, "teardown failure"),
		kind => error!(target = "warden.session", %context, ?kind, error = %err, "failure"),
	}
}
