//! Browser driver seam.
//!
//! A live session is three nested handles, acquired outer to inner and
//! released inner to outer:
//!
//! 1. [`Platform`]: the automation runtime (driver process, reserved port)
//! 2. [`Browser`]: a launched browser attached to the platform
//! 3. [`Page`]: the single page the engine works on
//!
//! The supervisor only ever talks to these traits, so the CDP backend in
//! [`crate::cdp`] and the in-memory [`crate::fake`] backend are
//! interchangeable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
	pub headless: bool,
	pub proxy: Option<String>,
	pub downloads_dir: Option<PathBuf>,
	pub executable: Option<PathBuf>,
	/// Remote debugging port; `None` picks a free port.
	pub debug_port: Option<u16>,
	pub args: Vec<String>,
	/// Upper bound for the browser to expose its debugging endpoint.
	pub startup_timeout: Duration,
}

impl Default for LaunchOptions {
	fn default() -> Self {
		Self {
			headless: true,
			proxy: None,
			downloads_dir: None,
			executable: None,
			debug_port: None,
			args: vec!["--disable-gpu".into(), "--no-sandbox".into(), "--disable-dev-shm-usage".into()],
			startup_timeout: Duration::from_secs(15),
		}
	}
}

/// Entry point that allocates a fresh automation platform.
#[async_trait]
pub trait Driver: Send + Sync {
	async fn start(&self) -> Result<Box<dyn Platform>>;
}

#[async_trait]
pub trait Platform: Send + Sync {
	async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Browser>>;
	async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Browser: Send + Sync {
	async fn new_page(&self) -> Result<Arc<dyn Page>>;
	async fn is_connected(&self) -> bool;
	async fn close(&self) -> Result<()>;
}

/// Operations the supervisor and its workflow collaborators need from a page.
///
/// Every call carries an explicit timeout; a timeout is reported as
/// [`crate::RuntimeError::Timeout`] and never blocks indefinitely.
#[async_trait]
pub trait Page: Send + Sync {
	async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;
	async fn reload(&self, timeout: Duration) -> Result<()>;
	/// Full-page PNG capture.
	async fn screenshot(&self, timeout: Duration) -> Result<Vec<u8>>;
	async fn is_visible(&self, selector: &str, timeout: Duration) -> Result<bool>;
	/// Polls until `selector` is visible or `timeout` elapses.
	async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()>;
	async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;
	async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;
	async fn evaluate(&self, expression: &str, timeout: Duration) -> Result<Value>;
	async fn url(&self) -> Result<String>;
	async fn is_closed(&self) -> bool;
	async fn close(&self) -> Result<()>;
}

/// JavaScript predicate shared by backends that evaluate visibility in-page.
pub fn visibility_script(selector: &str) -> String {
	let literal = Value::String(selector.to_string()).to_string();
	format!(
		"(() => {{ const el = document.querySelector({literal}); if (!el) return false; \
		 const style = window.getComputedStyle(el); const rect = el.getBoundingClientRect(); \
		 return style.visibility !== 'hidden' && style.display !== 'none' && rect.width > 0 && rect.height > 0; }})()"
	)
}

pub fn click_script(selector: &str) -> String {
	let literal = Value::String(selector.to_string()).to_string();
	format!("(() => {{ const el = document.querySelector({literal}); if (!el) return false; el.click(); return true; }})()")
}

pub fn fill_script(selector: &str, value: &str) -> String {
	let literal = Value::String(selector.to_string()).to_string();
	let text = Value::String(value.to_string()).to_string();
	format!(
		"(() => {{ const el = document.querySelector({literal}); if (!el) return false; el.focus(); el.value = {text}; \
		 el.dispatchEvent(new Event('input', {{ bubbles: true }})); el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()"
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn selector_is_embedded_as_js_string_literal() {
		let script = visibility_script("input[data-label='ID']");
		assert!(script.contains("document.querySelector(\"input[data-label='ID']\")"));
		let fill = fill_script("#password", "p\"w");
		assert!(fill.contains("el.value = \"p\\\"w\""));
	}

	#[test]
	fn default_launch_args_harden_headless_chrome() {
		let options = LaunchOptions::default();
		assert!(options.headless);
		assert!(options.args.iter().any(|a| a == "--no-sandbox"));
		assert!(options.args.iter().any(|a| a == "--disable-dev-shm-usage"));
	}
}
