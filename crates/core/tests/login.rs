mod common;

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use common::{ENTRY, Harness, LANDMARK, ScriptedClassifier, config};
use serde_json::Value;
use warden::engine::LoginResult;
use warden::{ChallengeSolver, Engine, LoginOutcome, Rejection};
use warden_protocol::{ExternalStatus, Lifecycle};
use warden_runtime::fake::FakeDriver;

#[tokio::test]
async fn visible_landmark_means_already_logged_in() {
	let harness = Harness::new().started().await;
	harness.driver.show(LANDMARK);

	assert_eq!(harness.engine.login().await, LoginResult::AlreadyLoggedIn);
	let state = harness.engine.status();
	assert_eq!(state.lifecycle, Lifecycle::Idle);
	assert_eq!(state.external_status, ExternalStatus::LoginSuccess);
	assert_eq!(harness.login.calls(), 0);
	assert_eq!(harness.driver.count(&format!("navigate {ENTRY}")), 1);
}

#[tokio::test]
async fn successful_login_ends_idle() {
	let harness = Harness::new().started().await;

	let result = harness.engine.login().await;
	assert_eq!(result, LoginResult::LoggedIn);
	assert!(result.is_success());

	let state = harness.engine.status();
	assert_eq!(state.lifecycle, Lifecycle::Idle);
	assert_eq!(state.external_status, ExternalStatus::LoginSuccess);
	assert_eq!(state.current_activity, "NONE");
	assert_eq!(harness.login.calls(), 1);
}

#[tokio::test]
async fn failed_login_returns_to_initial_and_reloads() {
	let harness = Harness::new().started().await;
	harness.login.push(LoginOutcome::Failed("challenge attempts exhausted".into()));

	let result = harness.engine.login().await;
	assert_eq!(result, LoginResult::Failed("challenge attempts exhausted".into()));

	let state = harness.engine.status();
	assert_eq!(state.lifecycle, Lifecycle::Initial);
	assert_eq!(state.external_status, ExternalStatus::LoginError);
	assert_eq!(harness.driver.count("reload"), 1);
}

#[tokio::test]
async fn login_is_rejected_while_crashed_or_busy() {
	let harness = Harness::new().started().await;

	harness.engine.state().set_lifecycle(Lifecycle::Crash);
	assert_eq!(harness.engine.login().await, LoginResult::Rejected(Rejection::Crashed));

	harness.engine.state().set_lifecycle(Lifecycle::Processing);
	assert_eq!(harness.engine.login().await, LoginResult::Rejected(Rejection::Busy));

	assert_eq!(harness.driver.count("navigate"), 0);
	assert_eq!(harness.login.calls(), 0);
}

#[tokio::test]
async fn login_during_workflow_of_logged_in_engine_succeeds() {
	let harness = Harness::new().started().await;
	let engine = &harness.engine;
	engine.state().set_outcome(Lifecycle::Idle, ExternalStatus::LoginSuccess);
	let guard = engine.begin_workflow("SCORING").expect("idle engine accepts work");
	let navigations = harness.driver.count("navigate");

	let result = engine.login().await;
	assert_eq!(result, LoginResult::AlreadyLoggedIn);
	assert!(result.is_success());
	assert_eq!(harness.driver.count("navigate"), navigations);
	assert_eq!(harness.login.calls(), 0);
	let during = engine.status();
	assert_eq!(during.lifecycle, Lifecycle::Processing);
	assert_eq!(during.current_activity, "SCORING");

	drop(guard);
	assert_eq!(engine.status().lifecycle, Lifecycle::Idle);
}

#[tokio::test]
async fn entry_navigation_failure_is_a_login_error() {
	let harness = Harness::new().started().await;
	harness.driver.fail_navigations(1);

	assert!(matches!(harness.engine.login().await, LoginResult::Failed(_)));
	let state = harness.engine.status();
	assert_eq!(state.lifecycle, Lifecycle::Initial);
	assert_eq!(state.external_status, ExternalStatus::LoginError);
	assert_eq!(harness.login.calls(), 0);
}

#[tokio::test]
async fn terminal_screen_during_login_crashes_the_engine() {
	let harness = Harness::new().started().await;
	harness.classifier.push(Some("SESS2"));

	assert!(matches!(harness.engine.login().await, LoginResult::Failed(_)));
	assert_eq!(harness.engine.state().lifecycle(), Lifecycle::Crash);
	assert_eq!(harness.login.calls(), 0);
}

#[tokio::test]
async fn unknown_screen_defers_login() {
	let harness = Harness::new().started().await;
	harness.classifier.push(Some("MAINTENANCE"));

	assert_eq!(harness.engine.login().await, LoginResult::Deferred("MAINTENANCE".into()));
	assert_eq!(harness.engine.state().lifecycle(), Lifecycle::Initial);
	assert_eq!(harness.driver.count("reload"), 1);
	assert_eq!(harness.login.calls(), 0);
}

#[tokio::test]
async fn login_allocates_a_missing_session() {
	let harness = Harness::new();
	assert!(!harness.engine.sessions().is_allocated());

	assert_eq!(harness.engine.login().await, LoginResult::LoggedIn);
	assert!(harness.engine.sessions().is_allocated());
	assert_eq!(harness.driver.launches(), 1);
}

#[tokio::test]
async fn logout_clicks_link_and_resets_status() {
	let harness = Harness::new().started().await;
	harness.engine.login().await;
	harness.driver.show("a.logout");
	harness.driver.on_click("a.logout", "input[name='userId']", true);
	harness.driver.on_click("a.logout", LANDMARK, false);

	harness.engine.logout().await;

	assert_eq!(harness.driver.count("click a.logout"), 1);
	let state = harness.engine.status();
	assert_eq!(state.lifecycle, Lifecycle::Initial);
	assert_eq!(state.external_status, ExternalStatus::None);
}

#[tokio::test]
async fn logout_without_link_or_session_still_resets() {
	let harness = Harness::new();
	harness.engine.state().set_outcome(Lifecycle::Idle, ExternalStatus::LoginSuccess);

	harness.engine.logout().await;

	let state = harness.engine.status();
	assert_eq!(state.lifecycle, Lifecycle::Initial);
	assert_eq!(state.external_status, ExternalStatus::None);
}

#[tokio::test]
async fn logout_keeps_crash() {
	let harness = Harness::new().started().await;
	harness.engine.state().set_lifecycle(Lifecycle::Crash);

	harness.engine.logout().await;
	assert_eq!(harness.engine.state().lifecycle(), Lifecycle::Crash);
}

struct FixedSolver(&'static str);

#[async_trait]
impl ChallengeSolver for FixedSolver {
	async fn solve(&self, challenge: &[u8]) -> warden::Result<Option<String>> {
		assert_eq!(&challenge[..8], b"\x89PNG\r\n\x1a\n");
		Ok(Some(self.0.to_string()))
	}
}

fn challenge_data_url() -> Value {
	let image = image::GrayImage::from_fn(40, 16, |x, y| image::Luma([((x * 7 + y * 13) % 255) as u8]));
	let mut png = Cursor::new(Vec::new());
	image.write_to(&mut png, image::ImageFormat::Png).unwrap();
	let encoded = base64::engine::general_purpose::STANDARD.encode(png.into_inner());
	Value::String(format!("data:image/png;base64,{encoded}"))
}

/// Engine using the real form login with a scripted page.
fn form_engine(driver: &FakeDriver, classifier: Arc<ScriptedClassifier>) -> Engine {
	let mut config = config();
	config.login.credentials.username = "operator".into();
	config.login.credentials.password = "s3cret".into();
	for selector in [
		"input[name='userId']",
		"input[name='password']",
		"input[name='captcha']",
		"button[type='submit']",
		"#captcha-img",
	] {
		driver.show(selector);
	}
	Engine::builder(config)
		.driver(Arc::new(driver.clone()))
		.classifier(classifier)
		.solver(Arc::new(FixedSolver("7KQ2")))
		.build()
		.unwrap()
}

#[tokio::test]
async fn form_login_fills_credentials_and_answer() {
	let driver = FakeDriver::new();
	let engine = form_engine(&driver, Arc::new(ScriptedClassifier::default()));
	driver.push_evaluation(challenge_data_url());
	driver.on_click("button[type='submit']", LANDMARK, true);
	engine.sessions().init().await.unwrap();

	assert_eq!(engine.login().await, LoginResult::LoggedIn);

	let calls = driver.calls();
	assert!(calls.contains(&"fill input[name='userId']=operator".to_string()));
	assert!(calls.contains(&"fill input[name='password']=s3cret".to_string()));
	assert!(calls.contains(&"fill input[name='captcha']=7KQ2".to_string()));
	assert_eq!(engine.status().external_status, ExternalStatus::LoginSuccess);
}

#[tokio::test(start_paused = true)]
async fn rejected_challenges_exhaust_into_login_error() {
	let driver = FakeDriver::new();
	let classifier = Arc::new(ScriptedClassifier::default());
	// First classification is the pre-login screen check.
	classifier.push(None);
	for _ in 0..3 {
		classifier.push(Some("CAP"));
		driver.push_evaluation(challenge_data_url());
	}
	let engine = form_engine(&driver, classifier);
	engine.sessions().init().await.unwrap();

	assert_eq!(
		engine.login().await,
		LoginResult::Failed("challenge attempts exhausted".into())
	);
	assert_eq!(driver.count("fill input[name='captcha']"), 3);
	assert_eq!(driver.count("click button[type='submit']"), 3);
	let state = engine.status();
	assert_eq!(state.lifecycle, Lifecycle::Initial);
	assert_eq!(state.external_status, ExternalStatus::LoginError);
}
