//! In-memory driver for tests.
//!
//! A [`FakeDriver`] and every platform, browser and page it hands out share
//! one [`FakeState`]. Tests script it (failing launches, visible selectors,
//! queued screenshots, click side effects) and inspect the recorded calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::driver::{Browser, Driver, LaunchOptions, Page, Platform};
use crate::error::{Result, RuntimeError};

#[derive(Default)]
pub struct FakeState {
	calls: Mutex<Vec<String>>,
	launch_failures: AtomicU32,
	navigation_failures: AtomicU32,
	screenshot_fails: AtomicBool,
	disconnected: AtomicBool,
	release_failures: Mutex<HashSet<&'static str>>,
	visible: Mutex<HashSet<String>>,
	click_effects: Mutex<HashMap<String, Vec<(String, bool)>>>,
	screenshots: Mutex<VecDeque<Vec<u8>>>,
	default_screenshot: Mutex<Vec<u8>>,
	evaluations: Mutex<VecDeque<Value>>,
	url: Mutex<String>,
	launches: AtomicU32,
	pages_open: AtomicU32,
}

impl FakeState {
	fn record(&self, call: impl Into<String>) {
		self.calls.lock().push(call.into());
	}

	fn release(&self, handle: &'static str) -> Result<()> {
		self.record(format!("close {handle}"));
		if self.release_failures.lock().contains(handle) {
			return Err(RuntimeError::Connection(format!("{handle} refused to close")));
		}
		Ok(())
	}
}

/// Scriptable driver; clones share state.
#[derive(Clone, Default)]
pub struct FakeDriver {
	state: Arc<FakeState>,
}

impl FakeDriver {
	pub fn new() -> Self {
		Self::default()
	}

	/// The next `count` launches fail.
	pub fn fail_launches(&self, count: u32) {
		self.state.launch_failures.store(count, Ordering::SeqCst);
	}

	/// The next `count` navigations fail with a timeout.
	pub fn fail_navigations(&self, count: u32) {
		self.state.navigation_failures.store(count, Ordering::SeqCst);
	}

	pub fn fail_screenshots(&self, fail: bool) {
		self.state.screenshot_fails.store(fail, Ordering::SeqCst);
	}

	/// Makes `close` on `"page"`, `"browser"` or `"platform"` return an error.
	pub fn fail_release(&self, handle: &'static str) {
		self.state.release_failures.lock().insert(handle);
	}

	/// Simulates the browser dying underneath the session.
	pub fn disconnect(&self) {
		self.state.disconnected.store(true, Ordering::SeqCst);
	}

	pub fn show(&self, selector: &str) {
		self.state.visible.lock().insert(selector.to_string());
	}

	pub fn hide(&self, selector: &str) {
		self.state.visible.lock().remove(selector);
	}

	/// Clicking `selector` makes `target` visible (`true`) or hidden (`false`).
	pub fn on_click(&self, selector: &str, target: &str, visible: bool) {
		self.state
			.click_effects
			.lock()
			.entry(selector.to_string())
			.or_default()
			.push((target.to_string(), visible));
	}

	/// Queues one screenshot; once the queue drains the default is returned.
	pub fn push_screenshot(&self, png: Vec<u8>) {
		self.state.screenshots.lock().push_back(png);
	}

	pub fn set_default_screenshot(&self, png: Vec<u8>) {
		*self.state.default_screenshot.lock() = png;
	}

	/// Queues one `evaluate` result; an empty queue evaluates to `null`.
	pub fn push_evaluation(&self, value: Value) {
		self.state.evaluations.lock().push_back(value);
	}

	pub fn calls(&self) -> Vec<String> {
		self.state.calls.lock().clone()
	}

	pub fn count(&self, prefix: &str) -> usize {
		self.state.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
	}

	pub fn clear_calls(&self) {
		self.state.calls.lock().clear();
	}

	pub fn launches(&self) -> u32 {
		self.state.launches.load(Ordering::SeqCst)
	}

	pub fn pages_open(&self) -> u32 {
		self.state.pages_open.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Driver for FakeDriver {
	async fn start(&self) -> Result<Box<dyn Platform>> {
		self.state.record("start");
		Ok(Box::new(FakePlatform {
			state: Arc::clone(&self.state),
		}))
	}
}

struct FakePlatform {
	state: Arc<FakeState>,
}

#[async_trait]
impl Platform for FakePlatform {
	async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn Browser>> {
		self.state.record("launch");
		let pending = self.state.launch_failures.load(Ordering::SeqCst);
		if pending > 0 {
			self.state.launch_failures.store(pending - 1, Ordering::SeqCst);
			return Err(RuntimeError::Launch("scripted launch failure".into()));
		}
		self.state.launches.fetch_add(1, Ordering::SeqCst);
		self.state.disconnected.store(false, Ordering::SeqCst);
		Ok(Box::new(FakeBrowser {
			state: Arc::clone(&self.state),
			closed: AtomicBool::new(false),
		}))
	}

	async fn close(&self) -> Result<()> {
		self.state.release("platform")
	}
}

struct FakeBrowser {
	state: Arc<FakeState>,
	closed: AtomicBool,
}

#[async_trait]
impl Browser for FakeBrowser {
	async fn new_page(&self) -> Result<Arc<dyn Page>> {
		self.state.record("new_page");
		self.state.pages_open.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::new(FakePage {
			state: Arc::clone(&self.state),
			closed: AtomicBool::new(false),
		}))
	}

	async fn is_connected(&self) -> bool {
		!self.closed.load(Ordering::SeqCst) && !self.state.disconnected.load(Ordering::SeqCst)
	}

	async fn close(&self) -> Result<()> {
		self.closed.store(true, Ordering::SeqCst);
		self.state.release("browser")
	}
}

struct FakePage {
	state: Arc<FakeState>,
	closed: AtomicBool,
}

impl FakePage {
	fn ensure_open(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) || self.state.disconnected.load(Ordering::SeqCst) {
			return Err(RuntimeError::TargetClosed);
		}
		Ok(())
	}

	fn visible(&self, selector: &str) -> bool {
		self.state.visible.lock().contains(selector)
	}
}

#[async_trait]
impl Page for FakePage {
	async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
		self.state.record(format!("navigate {url}"));
		self.ensure_open()?;
		let pending = self.state.navigation_failures.load(Ordering::SeqCst);
		if pending > 0 {
			self.state.navigation_failures.store(pending - 1, Ordering::SeqCst);
			return Err(RuntimeError::Timeout {
				ms: timeout.as_millis() as u64,
				condition: format!("navigation to {url}"),
			});
		}
		*self.state.url.lock() = url.to_string();
		Ok(())
	}

	async fn reload(&self, _timeout: Duration) -> Result<()> {
		self.state.record("reload");
		self.ensure_open()
	}

	async fn screenshot(&self, timeout: Duration) -> Result<Vec<u8>> {
		self.state.record("screenshot");
		self.ensure_open()?;
		if self.state.screenshot_fails.load(Ordering::SeqCst) {
			return Err(RuntimeError::Timeout {
				ms: timeout.as_millis() as u64,
				condition: "screenshot".into(),
			});
		}
		let queued = self.state.screenshots.lock().pop_front();
		Ok(queued.unwrap_or_else(|| self.state.default_screenshot.lock().clone()))
	}

	async fn is_visible(&self, selector: &str, _timeout: Duration) -> Result<bool> {
		self.state.record(format!("is_visible {selector}"));
		self.ensure_open()?;
		Ok(self.visible(selector))
	}

	async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
		self.state.record(format!("wait_for {selector}"));
		self.ensure_open()?;
		if self.visible(selector) {
			Ok(())
		} else {
			Err(RuntimeError::Timeout {
				ms: timeout.as_millis() as u64,
				condition: format!("selector {selector}"),
			})
		}
	}

	async fn click(&self, selector: &str, _timeout: Duration) -> Result<()> {
		self.state.record(format!("click {selector}"));
		self.ensure_open()?;
		if !self.visible(selector) {
			return Err(RuntimeError::ElementNotFound(selector.to_string()));
		}
		let effects = self.state.click_effects.lock().get(selector).cloned().unwrap_or_default();
		let mut visible = self.state.visible.lock();
		for (target, show) in effects {
			if show {
				visible.insert(target);
			} else {
				visible.remove(&target);
			}
		}
		Ok(())
	}

	async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> Result<()> {
		self.state.record(format!("fill {selector}={value}"));
		self.ensure_open()?;
		if !self.visible(selector) {
			return Err(RuntimeError::ElementNotFound(selector.to_string()));
		}
		Ok(())
	}

	async fn evaluate(&self, _expression: &str, _timeout: Duration) -> Result<Value> {
		self.state.record("evaluate");
		self.ensure_open()?;
		Ok(self.state.evaluations.lock().pop_front().unwrap_or(Value::Null))
	}

	async fn url(&self) -> Result<String> {
		self.ensure_open()?;
		Ok(self.state.url.lock().clone())
	}

	async fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	async fn close(&self) -> Result<()> {
		if !self.closed.swap(true, Ordering::SeqCst) {
			self.state.pages_open.fetch_sub(1, Ordering::SeqCst);
		}
		self.state.release("page")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const T: Duration = Duration::from_secs(1);

	#[tokio::test]
	async fn click_effects_toggle_visibility() {
		let driver = FakeDriver::new();
		driver.show("#submit");
		driver.on_click("#submit", "#top1menu", true);

		let platform = driver.start().await.unwrap();
		let browser = platform.launch(&LaunchOptions::default()).await.unwrap();
		let page = browser.new_page().await.unwrap();

		assert!(!page.is_visible("#top1menu", T).await.unwrap());
		page.click("#submit", T).await.unwrap();
		assert!(page.is_visible("#top1menu", T).await.unwrap());
		assert!(page.click("#missing", T).await.is_err());
	}

	#[tokio::test]
	async fn scripted_failures_are_consumed_in_order() {
		let driver = FakeDriver::new();
		driver.fail_launches(1);
		let platform = driver.start().await.unwrap();
		assert!(platform.launch(&LaunchOptions::default()).await.is_err());
		let browser = platform.launch(&LaunchOptions::default()).await.unwrap();
		assert_eq!(driver.launches(), 1);

		driver.disconnect();
		assert!(!browser.is_connected().await);
	}

	#[tokio::test]
	async fn closed_page_reports_target_closed() {
		let driver = FakeDriver::new();
		let platform = driver.start().await.unwrap();
		let browser = platform.launch(&LaunchOptions::default()).await.unwrap();
		let page = browser.new_page().await.unwrap();
		assert_eq!(driver.pages_open(), 1);
		page.close().await.unwrap();
		assert_eq!(driver.pages_open(), 0);
		assert!(matches!(page.reload(T).await, Err(RuntimeError::TargetClosed)));
	}
}
