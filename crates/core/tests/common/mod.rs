#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use warden::config::EngineConfig;
use warden::screen::{ScreenClassifier, ScreenMatch};
use warden::{Engine, EngineBuilder, EngineError, LoginFlow, LoginOutcome, RemoteReporter};
use warden_protocol::{HeartbeatPayload, now_ms};
use warden_runtime::Page;
use warden_runtime::fake::FakeDriver;

pub const ENTRY: &str = "https://target.test/login";
pub const LANDMARK: &str = "#top1menu";

pub fn config() -> EngineConfig {
	let mut config = EngineConfig::default();
	config.engine.name = "robot-7".into();
	config.engine.entry_url = ENTRY.into();
	config
}

pub fn minutes_ago(minutes: u64) -> u64 {
	now_ms() - minutes * 60_000
}

pub fn seconds_ago(seconds: u64) -> u64 {
	now_ms() - seconds * 1_000
}

/// Hands out queued screen names, one per `classify` call, then `None`.
#[derive(Default)]
pub struct ScriptedClassifier {
	queue: Mutex<VecDeque<Option<String>>>,
	calls: AtomicU32,
}

impl ScriptedClassifier {
	pub fn push(&self, screen: Option<&str>) {
		self.queue.lock().push_back(screen.map(String::from));
	}

	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}
}

impl ScreenClassifier for ScriptedClassifier {
	fn classify(&self, _snapshot: &[u8]) -> Option<ScreenMatch> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.queue.lock().pop_front().flatten().map(|name| ScreenMatch { name, score: 1.0 })
	}
}

/// Login flow that returns queued outcomes; `LoggedIn` reveals the landmark.
pub struct ScriptedLogin {
	driver: FakeDriver,
	outcomes: Mutex<VecDeque<LoginOutcome>>,
	calls: AtomicU32,
}

impl ScriptedLogin {
	pub fn new(driver: FakeDriver) -> Self {
		Self {
			driver,
			outcomes: Mutex::new(VecDeque::new()),
			calls: AtomicU32::new(0),
		}
	}

	pub fn push(&self, outcome: LoginOutcome) {
		self.outcomes.lock().push_back(outcome);
	}

	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl LoginFlow for ScriptedLogin {
	async fn login(&self, _page: Arc<dyn Page>) -> warden::Result<LoginOutcome> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let outcome = self.outcomes.lock().pop_front().unwrap_or(LoginOutcome::LoggedIn);
		if outcome == LoginOutcome::LoggedIn {
			self.driver.show(LANDMARK);
		}
		Ok(outcome)
	}
}

#[derive(Default)]
pub struct RecordingReporter {
	payloads: Mutex<Vec<HeartbeatPayload>>,
	failing: std::sync::atomic::AtomicBool,
}

impl RecordingReporter {
	pub fn fail(&self) {
		self.failing.store(true, Ordering::SeqCst);
	}

	pub fn payloads(&self) -> Vec<HeartbeatPayload> {
		self.payloads.lock().clone()
	}

	pub fn last(&self) -> HeartbeatPayload {
		self.payloads.lock().last().cloned().expect("no heartbeat recorded")
	}
}

#[async_trait]
impl RemoteReporter for RecordingReporter {
	async fn report(&self, payload: &HeartbeatPayload) -> warden::Result<()> {
		self.payloads.lock().push(payload.clone());
		if self.failing.load(Ordering::SeqCst) {
			return Err(EngineError::Report("collector unavailable".into()));
		}
		Ok(())
	}
}

pub struct Harness {
	pub driver: FakeDriver,
	pub classifier: Arc<ScriptedClassifier>,
	pub login: Arc<ScriptedLogin>,
	pub reporter: Arc<RecordingReporter>,
	pub engine: Arc<Engine>,
}

impl Harness {
	pub fn new() -> Self {
		Self::with_config(config())
	}

	pub fn with_config(config: EngineConfig) -> Self {
		Self::build(config, |builder| builder)
	}

	/// Scripted collaborators everywhere; `customize` may replace any of them.
	pub fn build(config: EngineConfig, customize: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Self {
		let driver = FakeDriver::new();
		let classifier = Arc::new(ScriptedClassifier::default());
		let login = Arc::new(ScriptedLogin::new(driver.clone()));
		let reporter = Arc::new(RecordingReporter::default());
		let builder = Engine::builder(config)
			.driver(Arc::new(driver.clone()))
			.classifier(classifier.clone())
			.login_flow(login.clone())
			.reporter(reporter.clone());
		let engine = Arc::new(customize(builder).build().expect("engine builds"));
		Self {
			driver,
			classifier,
			login,
			reporter,
			engine,
		}
	}

	/// Allocates the session without logging in.
	pub async fn started(self) -> Self {
		self.engine.sessions().init().await.expect("fake session allocates");
		self
	}
}
