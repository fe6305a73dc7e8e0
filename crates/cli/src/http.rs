//! HTTP control surface under `/api/robot`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use warden::{Engine, RestartOutcome};
use warden_protocol::{ApiResponse, EngineSnapshot, ExternalStatus, HeartbeatPayload, Lifecycle, PingResponse};

type Shared = State<Arc<Engine>>;

pub fn router(engine: Arc<Engine>) -> Router {
	let api = Router::new()
		.route("/ping", get(ping))
		.route("/status", get(status))
		.route("/state", get(state))
		.route("/state/lifecycle", post(set_lifecycle))
		.route("/state/external", post(set_external))
		.route("/login", get(login))
		.route("/logout", get(logout))
		.route("/restart", get(restart))
		.route("/reload", get(reload))
		.route("/screenshot", get(screenshot));
	Router::new().nest("/api/robot", api).with_state(engine)
}

async fn ping(State(engine): Shared) -> Json<ApiResponse<PingResponse>> {
	Json(ApiResponse::ok(engine.ping()))
}

async fn status(State(engine): Shared) -> Json<ApiResponse<HeartbeatPayload>> {
	Json(ApiResponse::ok(engine.heartbeat_payload().await))
}

async fn state(State(engine): Shared) -> Json<ApiResponse<EngineSnapshot>> {
	Json(ApiResponse::ok(engine.status()))
}

#[derive(Debug, Deserialize)]
struct LifecycleOverride {
	lifecycle: Lifecycle,
}

async fn set_lifecycle(State(engine): Shared, Json(body): Json<LifecycleOverride>) -> Json<ApiResponse<EngineSnapshot>> {
	warn!(target = "warden.http", lifecycle = %body.lifecycle, "operator lifecycle override");
	engine.state().set_lifecycle(body.lifecycle);
	Json(ApiResponse::ok(engine.status()))
}

#[derive(Debug, Deserialize)]
struct ExternalOverride {
	status: ExternalStatus,
}

async fn set_external(State(engine): Shared, Json(body): Json<ExternalOverride>) -> Json<ApiResponse<EngineSnapshot>> {
	warn!(target = "warden.http", status = %body.status, "operator external status override");
	engine.state().set_external_status(body.status);
	Json(ApiResponse::ok(engine.status()))
}

async fn login(State(engine): Shared) -> Json<ApiResponse<Value>> {
	let result = engine.login().await;
	info!(target = "warden.http", %result, "login requested");
	Json(ApiResponse::message(result.is_success(), result.to_string()))
}

async fn logout(State(engine): Shared) -> Json<ApiResponse<Value>> {
	engine.logout().await;
	Json(ApiResponse::message(true, "logged out"))
}

async fn restart(State(engine): Shared) -> Json<ApiResponse<Value>> {
	let outcome = engine.restart_session().await;
	info!(target = "warden.http", restart = ?outcome.restart, login = ?outcome.login, "restart requested");
	let message = match (&outcome.restart, &outcome.login) {
		(RestartOutcome::Recovered, Some(login)) => format!("session rebuilt; {login}"),
		(RestartOutcome::Recovered, None) => "session rebuilt".to_string(),
		(RestartOutcome::Skipped, _) => "restart already in progress".to_string(),
		(RestartOutcome::Failed, _) => "session rebuild failed; crash check will retry".to_string(),
	};
	let ok = outcome.restart == RestartOutcome::Recovered && outcome.login.as_ref().is_some_and(|l| l.is_success());
	Json(ApiResponse::message(ok, message))
}

async fn reload(State(engine): Shared) -> Json<ApiResponse<Value>> {
	match engine.reload_page().await {
		Ok(()) => Json(ApiResponse::message(true, "page reloaded")),
		Err(err) => Json(ApiResponse::message(false, format!("reload failed: {err}"))),
	}
}

async fn screenshot(State(engine): Shared) -> Response {
	match engine.screenshot().await {
		Ok(png) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
		Err(err) => (
			StatusCode::SERVICE_UNAVAILABLE,
			Json(ApiResponse::<Value>::message(false, format!("screenshot failed: {err}"))),
		)
			.into_response(),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use warden::config::EngineConfig;
	use warden::screen::TemplateClassifier;
	use warden_runtime::fake::FakeDriver;

	use super::*;

	async fn serve() -> (String, Arc<Engine>, FakeDriver) {
		let driver = FakeDriver::new();
		let mut config = EngineConfig::default();
		config.engine.name = "robot-http".into();
		let engine = Arc::new(
			Engine::builder(config)
				.driver(Arc::new(driver.clone()))
				.classifier(Arc::new(TemplateClassifier::new(Vec::new())))
				.build()
				.unwrap(),
		);
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let app = router(Arc::clone(&engine));
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
		(format!("http://{addr}/api/robot"), engine, driver)
	}

	#[tokio::test]
	async fn ping_and_state_use_the_envelope() {
		let (base, _engine, _driver) = serve().await;
		let ping: Value = reqwest::get(format!("{base}/ping")).await.unwrap().json().await.unwrap();
		assert_eq!(ping["status"], true);
		assert_eq!(ping["data"][0]["name"], "robot-http");

		let state: Value = reqwest::get(format!("{base}/state")).await.unwrap().json().await.unwrap();
		assert_eq!(state["data"][0]["lifecycle"], "INITIAL");
		assert_eq!(state["data"][0]["externalStatus"], "NONE");
	}

	#[tokio::test]
	async fn operator_overrides_apply_directly() {
		let (base, engine, _driver) = serve().await;
		let client = reqwest::Client::new();

		let body: Value = client
			.post(format!("{base}/state/lifecycle"))
			.json(&json!({"lifecycle": "CRASH"}))
			.send()
			.await
			.unwrap()
			.json()
			.await
			.unwrap();
		assert_eq!(body["data"][0]["lifecycle"], "CRASH");

		client
			.post(format!("{base}/state/external"))
			.json(&json!({"status": "LOGIN_ERROR"}))
			.send()
			.await
			.unwrap();
		let state = engine.status();
		assert_eq!(state.lifecycle, Lifecycle::Crash);
		assert_eq!(state.external_status, ExternalStatus::LoginError);

		let login: Value = reqwest::get(format!("{base}/login")).await.unwrap().json().await.unwrap();
		assert_eq!(login["status"], false);
		assert_eq!(login["message"], "login rejected: engine crashed");
	}

	#[tokio::test]
	async fn unknown_lifecycle_is_rejected() {
		let (base, engine, _driver) = serve().await;
		let response = reqwest::Client::new()
			.post(format!("{base}/state/lifecycle"))
			.json(&json!({"lifecycle": "SLEEPING"}))
			.send()
			.await
			.unwrap();
		assert!(response.status().is_client_error());
		assert_eq!(engine.status().lifecycle, Lifecycle::Initial);
	}

	#[tokio::test]
	async fn reload_and_screenshot_fail_without_session() {
		let (base, engine, driver) = serve().await;

		let reload: Value = reqwest::get(format!("{base}/reload")).await.unwrap().json().await.unwrap();
		assert_eq!(reload["status"], false);

		let shot = reqwest::get(format!("{base}/screenshot")).await.unwrap();
		assert_eq!(shot.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

		engine.sessions().init().await.unwrap();
		driver.set_default_screenshot(b"\x89PNG fake".to_vec());
		let shot = reqwest::get(format!("{base}/screenshot")).await.unwrap();
		assert_eq!(shot.headers()["content-type"], "image/png");
		assert_eq!(shot.bytes().await.unwrap().as_ref(), b"\x89PNG fake");

		let reload: Value = reqwest::get(format!("{base}/reload")).await.unwrap().json().await.unwrap();
		assert_eq!(reload["status"], true);
	}

	#[tokio::test]
	async fn status_reports_down_before_the_session_exists() {
		let (base, _engine, _driver) = serve().await;
		let status: Value = reqwest::get(format!("{base}/status")).await.unwrap().json().await.unwrap();
		assert_eq!(status["data"][0]["status"], "DOWN");
		assert_eq!(status["data"][0]["code"], "robot-http");
	}
}
