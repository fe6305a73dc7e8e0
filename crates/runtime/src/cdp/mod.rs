//! Chrome DevTools Protocol backend.
//!
//! [`CdpDriver`] spawns a local Chromium-family browser with a remote
//! debugging port, waits for `/json/version` to answer, and drives a single
//! page target over its own websocket.

mod connection;
mod finder;
mod probe;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use connection::CdpConnection;
pub use finder::find_chromium;
pub use probe::{TargetInfo, VersionInfo, fetch_version, list_targets};

use crate::driver::{self, Browser, Driver, LaunchOptions, Page, Platform};
use crate::error::{Result, RuntimeError};
use crate::process;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Launches local Chromium browsers.
#[derive(Debug, Default, Clone)]
pub struct CdpDriver;

impl CdpDriver {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl Driver for CdpDriver {
	async fn start(&self) -> Result<Box<dyn Platform>> {
		Ok(Box::new(CdpPlatform))
	}
}

/// The CDP platform holds no process of its own; each launch owns its browser.
pub struct CdpPlatform;

#[async_trait]
impl Platform for CdpPlatform {
	async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Browser>> {
		let executable = match &options.executable {
			Some(path) => path.clone(),
			None => find_chromium().ok_or_else(|| RuntimeError::Launch("no Chromium-family browser found".into()))?,
		};
		let port = match options.debug_port {
			Some(port) => port,
			None => process::free_port()?,
		};
		if !process::port_available(port) {
			return Err(RuntimeError::Launch(format!("debugging port {port} already in use")));
		}

		let profile = std::env::temp_dir().join(format!("warden-profile-{}-{port}", std::process::id()));
		std::fs::create_dir_all(&profile)?;

		let mut command = Command::new(&executable);
		command
			.arg(format!("--remote-debugging-port={port}"))
			.arg(format!("--user-data-dir={}", profile.display()))
			.arg("--no-first-run")
			.arg("--no-default-browser-check")
			.args(&options.args)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.kill_on_drop(true);
		if options.headless {
			command.arg("--headless=new");
		}
		if let Some(proxy) = &options.proxy {
			command.arg(format!("--proxy-server={proxy}"));
		}
		command.arg("about:blank");

		let mut child = command
			.spawn()
			.map_err(|e| RuntimeError::Launch(format!("failed to spawn {}: {e}", executable.display())))?;
		info!(target = "warden.cdp", executable = %executable.display(), port, pid = ?child.id(), "browser spawned");

		let version = match wait_for_endpoint(&mut child, port, options.startup_timeout).await {
			Ok(version) => version,
			Err(err) => {
				let _ = process::terminate(&mut child).await;
				let _ = std::fs::remove_dir_all(&profile);
				return Err(err);
			}
		};

		let connection = match CdpConnection::connect(&version.web_socket_debugger_url, options.startup_timeout).await {
			Ok(conn) => Arc::new(conn),
			Err(err) => {
				let _ = process::terminate(&mut child).await;
				let _ = std::fs::remove_dir_all(&profile);
				return Err(err);
			}
		};

		if let Some(dir) = &options.downloads_dir {
			let params = json!({ "behavior": "allow", "downloadPath": dir.display().to_string() });
			if let Err(err) = connection.send("Browser.setDownloadBehavior", params, CONTROL_TIMEOUT).await {
				warn!(target = "warden.cdp", error = %err, "download behaviour not applied");
			}
		}

		Ok(Box::new(CdpBrowser {
			port,
			connection,
			child: Mutex::new(Some(child)),
			profile,
		}))
	}

	async fn close(&self) -> Result<()> {
		Ok(())
	}
}

async fn wait_for_endpoint(child: &mut Child, port: u16, timeout: Duration) -> Result<VersionInfo> {
	let deadline = Instant::now() + timeout;
	loop {
		if !process::child_is_running(child) {
			return Err(RuntimeError::Launch("browser exited during startup".into()));
		}
		match fetch_version(port, Duration::from_millis(500)).await {
			Ok(version) => {
				debug!(target = "warden.cdp", port, browser = ?version.browser, "debugging endpoint ready");
				return Ok(version);
			}
			Err(err) if Instant::now() >= deadline => {
				return Err(RuntimeError::Launch(format!("debugging endpoint did not come up: {err}")));
			}
			Err(_) => tokio::time::sleep(POLL_INTERVAL).await,
		}
	}
}

pub struct CdpBrowser {
	port: u16,
	connection: Arc<CdpConnection>,
	child: Mutex<Option<Child>>,
	profile: PathBuf,
}

#[async_trait]
impl Browser for CdpBrowser {
	async fn new_page(&self) -> Result<Arc<dyn Page>> {
		let created = self
			.connection
			.send("Target.createTarget", json!({ "url": "about:blank" }), CONTROL_TIMEOUT)
			.await?;
		let target_id = created["targetId"]
			.as_str()
			.ok_or_else(|| RuntimeError::Protocol {
				method: "Target.createTarget".into(),
				message: "response carried no targetId".into(),
			})?
			.to_string();

		let targets = list_targets(self.port, CONTROL_TIMEOUT).await?;
		let ws_url = targets
			.into_iter()
			.find(|t| t.id == target_id)
			.and_then(|t| t.web_socket_debugger_url)
			.ok_or_else(|| RuntimeError::Connection(format!("target {target_id} has no debugger url")))?;

		let page = CdpConnection::connect(&ws_url, CONTROL_TIMEOUT).await?;
		page.send("Page.enable", json!({}), CONTROL_TIMEOUT).await?;
		page.send("Runtime.enable", json!({}), CONTROL_TIMEOUT).await?;
		debug!(target = "warden.cdp", %target_id, "page target attached");

		Ok(Arc::new(CdpPage {
			target_id,
			connection: page,
			browser: Arc::clone(&self.connection),
		}))
	}

	async fn is_connected(&self) -> bool {
		if self.connection.is_closed() {
			return false;
		}
		self.child.lock().as_mut().is_some_and(process::child_is_running)
	}

	async fn close(&self) -> Result<()> {
		if !self.connection.is_closed() {
			if let Err(err) = self.connection.send("Browser.close", json!({}), Duration::from_secs(2)).await {
				debug!(target = "warden.cdp", error = %err, "Browser.close failed");
			}
		}
		self.connection.close().await;

		let child = self.child.lock().take();
		let result = match child {
			Some(mut child) => process::terminate(&mut child).await.map_err(RuntimeError::from),
			None => Ok(()),
		};
		if let Err(err) = std::fs::remove_dir_all(&self.profile) {
			debug!(target = "warden.cdp", profile = %self.profile.display(), error = %err, "profile cleanup failed");
		}
		result
	}
}

impl Drop for CdpBrowser {
	fn drop(&mut self) {
		if let Some(mut child) = self.child.lock().take() {
			process::start_terminate(&mut child);
		}
	}
}

pub struct CdpPage {
	target_id: String,
	connection: CdpConnection,
	browser: Arc<CdpConnection>,
}

impl CdpPage {
	async fn wait_loaded(&self, deadline: Instant, timeout: Duration, condition: &str) -> Result<()> {
		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(RuntimeError::Timeout {
					ms: timeout.as_millis() as u64,
					condition: condition.to_string(),
				});
			}
			let state = self.evaluate("document.readyState", remaining).await?;
			if state.as_str() == Some("complete") {
				return Ok(());
			}
			tokio::time::sleep(POLL_INTERVAL).await;
		}
	}
}

#[async_trait]
impl Page for CdpPage {
	async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
		let deadline = Instant::now() + timeout;
		let response = self.connection.send("Page.navigate", json!({ "url": url }), timeout).await?;
		if let Some(error) = response["errorText"].as_str() {
			return Err(RuntimeError::Protocol {
				method: "Page.navigate".into(),
				message: format!("{url}: {error}"),
			});
		}
		self.wait_loaded(deadline, timeout, "navigation load").await
	}

	async fn reload(&self, timeout: Duration) -> Result<()> {
		let deadline = Instant::now() + timeout;
		self.connection.send("Page.reload", json!({}), timeout).await?;
		tokio::time::sleep(POLL_INTERVAL).await;
		self.wait_loaded(deadline, timeout, "reload").await
	}

	async fn screenshot(&self, timeout: Duration) -> Result<Vec<u8>> {
		let response = self
			.connection
			.send("Page.captureScreenshot", json!({ "format": "png", "captureBeyondViewport": true }), timeout)
			.await?;
		let data = response["data"].as_str().ok_or_else(|| RuntimeError::Protocol {
			method: "Page.captureScreenshot".into(),
			message: "response carried no data".into(),
		})?;
		STANDARD.decode(data).map_err(|e| RuntimeError::Protocol {
			method: "Page.captureScreenshot".into(),
			message: format!("invalid base64: {e}"),
		})
	}

	async fn is_visible(&self, selector: &str, timeout: Duration) -> Result<bool> {
		let value = self.evaluate(&driver::visibility_script(selector), timeout).await?;
		Ok(value.as_bool().unwrap_or(false))
	}

	async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
		let deadline = Instant::now() + timeout;
		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(RuntimeError::Timeout {
					ms: timeout.as_millis() as u64,
					condition: format!("selector {selector}"),
				});
			}
			if self.is_visible(selector, remaining).await? {
				return Ok(());
			}
			tokio::time::sleep(POLL_INTERVAL).await;
		}
	}

	async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
		self.wait_for(selector, timeout).await?;
		let clicked = self.evaluate(&driver::click_script(selector), timeout).await?;
		if clicked.as_bool() == Some(true) {
			Ok(())
		} else {
			Err(RuntimeError::ElementNotFound(selector.to_string()))
		}
	}

	async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
		self.wait_for(selector, timeout).await?;
		let filled = self.evaluate(&driver::fill_script(selector, value), timeout).await?;
		if filled.as_bool() == Some(true) {
			Ok(())
		} else {
			Err(RuntimeError::ElementNotFound(selector.to_string()))
		}
	}

	async fn evaluate(&self, expression: &str, timeout: Duration) -> Result<Value> {
		let response = self
			.connection
			.send(
				"Runtime.evaluate",
				json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
				timeout,
			)
			.await?;
		if let Some(details) = response.get("exceptionDetails") {
			let message = details["exception"]["description"]
				.as_str()
				.or_else(|| details["text"].as_str())
				.unwrap_or("script threw")
				.to_string();
			return Err(RuntimeError::Protocol {
				method: "Runtime.evaluate".into(),
				message,
			});
		}
		Ok(response["result"]["value"].clone())
	}

	async fn url(&self) -> Result<String> {
		let value = self.evaluate("window.location.href", CONTROL_TIMEOUT).await?;
		Ok(value.as_str().unwrap_or_default().to_string())
	}

	async fn is_closed(&self) -> bool {
		self.connection.is_closed()
	}

	async fn close(&self) -> Result<()> {
		let result = self
			.browser
			.send("Target.closeTarget", json!({ "targetId": self.target_id }), CONTROL_TIMEOUT)
			.await
			.map(|_| ());
		self.connection.close().await;
		result
	}
}
