//! Engine configuration.
//!
//! One JSON document with camelCase keys. Every section falls back to its
//! defaults, so `{}` is a valid configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use warden_runtime::LaunchOptions;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
	pub engine: IdentityConfig,
	pub browser: BrowserConfig,
	pub schedule: ScheduleConfig,
	pub watchdog: WatchdogConfig,
	pub restart: RestartConfig,
	pub timeouts: TimeoutConfig,
	pub screens: ScreensConfig,
	pub login: LoginConfig,
	pub report: ReportConfig,
	pub solver: SolverConfig,
	pub http: HttpConfig,
	pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityConfig {
	/// Robot code sent with every heartbeat.
	pub name: String,
	/// Control URL advertised by the ping endpoint.
	pub endpoint: String,
	pub entry_url: String,
}

impl Default for IdentityConfig {
	fn default() -> Self {
		Self {
			name: "warden".into(),
			endpoint: "http://127.0.0.1:8089".into(),
			entry_url: "about:blank".into(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserConfig {
	pub headless: bool,
	pub proxy: Option<String>,
	pub downloads_dir: Option<PathBuf>,
	pub executable: Option<PathBuf>,
	pub debug_port: Option<u16>,
	/// Extra launch arguments, appended to the hardened defaults.
	pub args: Vec<String>,
}

impl Default for BrowserConfig {
	fn default() -> Self {
		Self {
			headless: true,
			proxy: None,
			downloads_dir: None,
			executable: None,
			debug_port: None,
			args: Vec::new(),
		}
	}
}

impl BrowserConfig {
	pub fn launch_options(&self) -> LaunchOptions {
		let mut options = LaunchOptions {
			headless: self.headless,
			proxy: self.proxy.clone(),
			downloads_dir: self.downloads_dir.clone(),
			executable: self.executable.clone(),
			debug_port: self.debug_port,
			..LaunchOptions::default()
		};
		for arg in &self.args {
			if !options.args.contains(arg) {
				options.args.push(arg.clone());
			}
		}
		options
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleConfig {
	pub heartbeat_ms: u64,
	pub stale_login_ms: u64,
	pub stuck_state_ms: u64,
	pub crash_check_ms: u64,
}

impl Default for ScheduleConfig {
	fn default() -> Self {
		Self {
			heartbeat_ms: 30_000,
			stale_login_ms: 60_000,
			stuck_state_ms: 10_000,
			crash_check_ms: 30_000,
		}
	}
}

impl ScheduleConfig {
	pub fn heartbeat(&self) -> Duration {
		Duration::from_millis(self.heartbeat_ms)
	}

	pub fn stale_login(&self) -> Duration {
		Duration::from_millis(self.stale_login_ms)
	}

	pub fn stuck_state(&self) -> Duration {
		Duration::from_millis(self.stuck_state_ms)
	}

	pub fn crash_check(&self) -> Duration {
		Duration::from_millis(self.crash_check_ms)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchdogConfig {
	/// PROCESSING older than this is treated as abandoned by the stale-login check.
	pub processing_timeout_secs: u64,
	/// IDLE older than this gets a lightweight refresh.
	pub idle_refresh_secs: u64,
	/// PROCESSING older than this is forced back to IDLE by the stuck-state check.
	pub processing_stuck_secs: u64,
	/// Without a recent login, the stale-login check re-logs in after this long.
	pub logout_duration_mins: u64,
}

impl Default for WatchdogConfig {
	fn default() -> Self {
		Self {
			processing_timeout_secs: 180,
			idle_refresh_secs: 20,
			processing_stuck_secs: 600,
			logout_duration_mins: 30,
		}
	}
}

impl WatchdogConfig {
	pub fn processing_timeout(&self) -> Duration {
		Duration::from_secs(self.processing_timeout_secs)
	}

	pub fn idle_refresh(&self) -> Duration {
		Duration::from_secs(self.idle_refresh_secs)
	}

	pub fn processing_stuck(&self) -> Duration {
		Duration::from_secs(self.processing_stuck_secs)
	}

	pub fn logout_duration(&self) -> Duration {
		Duration::from_secs(self.logout_duration_mins * 60)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestartConfig {
	pub drain_cooldown_ms: u64,
	pub settle_cooldown_ms: u64,
}

impl Default for RestartConfig {
	fn default() -> Self {
		Self {
			drain_cooldown_ms: 5_000,
			settle_cooldown_ms: 2_000,
		}
	}
}

impl RestartConfig {
	pub fn drain_cooldown(&self) -> Duration {
		Duration::from_millis(self.drain_cooldown_ms)
	}

	pub fn settle_cooldown(&self) -> Duration {
		Duration::from_millis(self.settle_cooldown_ms)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
	pub navigation_ms: u64,
	pub screenshot_ms: u64,
	pub element_ms: u64,
	pub report_ms: u64,
}

impl Default for TimeoutConfig {
	fn default() -> Self {
		Self {
			navigation_ms: 60_000,
			screenshot_ms: 5_000,
			element_ms: 5_000,
			report_ms: 10_000,
		}
	}
}

impl TimeoutConfig {
	pub fn navigation(&self) -> Duration {
		Duration::from_millis(self.navigation_ms)
	}

	pub fn screenshot(&self) -> Duration {
		Duration::from_millis(self.screenshot_ms)
	}

	pub fn element(&self) -> Duration {
		Duration::from_millis(self.element_ms)
	}

	pub fn report(&self) -> Duration {
		Duration::from_millis(self.report_ms)
	}
}

/// One reference screen, in priority order within [`ScreensConfig::signatures`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureConfig {
	pub name: String,
	pub path: PathBuf,
	#[serde(default = "default_threshold")]
	pub threshold: f32,
}

fn default_threshold() -> f32 {
	0.75
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreensConfig {
	pub signatures: Vec<SignatureConfig>,
	/// Screens meaning the session was ended by the target.
	pub terminal: Vec<String>,
	pub challenge_rejected: Vec<String>,
	pub login_prompt: Vec<String>,
}

impl Default for ScreensConfig {
	fn default() -> Self {
		Self {
			signatures: Vec::new(),
			terminal: ["SESS1", "SESS2", "SITE", "RESET"].map(String::from).to_vec(),
			challenge_rejected: vec!["CAP".into()],
			login_prompt: vec!["LOGIN".into()],
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginSelectors {
	/// Only visible while logged in.
	pub landmark: String,
	pub home_link: String,
	pub username: String,
	pub password: String,
	pub challenge_image: String,
	pub challenge_answer: String,
	pub submit: String,
	/// Dismisses the "challenge rejected" dialog.
	pub dialog_dismiss: String,
	pub logout_link: String,
}

impl Default for LoginSelectors {
	fn default() -> Self {
		Self {
			landmark: "#top1menu".into(),
			home_link: "#top1menu a".into(),
			username: "input[name='userId']".into(),
			password: "input[name='password']".into(),
			challenge_image: "#captcha-img".into(),
			challenge_answer: "input[name='captcha']".into(),
			submit: "button[type='submit']".into(),
			dialog_dismiss: ".modal-footer button".into(),
			logout_link: "a.logout".into(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
	pub username: String,
	pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginConfig {
	pub selectors: LoginSelectors,
	pub credentials: Credentials,
	pub max_challenge_attempts: u32,
	pub challenge_retry_delay_ms: u64,
}

impl Default for LoginConfig {
	fn default() -> Self {
		Self {
			selectors: LoginSelectors::default(),
			credentials: Credentials::default(),
			max_challenge_attempts: 3,
			challenge_retry_delay_ms: 1_000,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportConfig {
	/// Absent disables heartbeat reporting.
	pub heartbeat_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolverConfig {
	pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
	pub bind: String,
}

impl Default for HttpConfig {
	fn default() -> Self {
		Self {
			bind: "127.0.0.1:8089".into(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateConfig {
	pub snapshot_path: Option<PathBuf>,
}

impl EngineConfig {
	/// Reads, parses and validates `path`.
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|source| EngineError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let mut config: EngineConfig = serde_json::from_str(&raw)?;
		if let Some(dir) = path.parent() {
			config.resolve_relative(dir);
		}
		config.validate()?;
		Ok(config)
	}

	/// Signature paths are relative to the config file.
	fn resolve_relative(&mut self, base: &Path) {
		for signature in &mut self.screens.signatures {
			if signature.path.is_relative() {
				signature.path = base.join(&signature.path);
			}
		}
	}

	/// Rejects invalid thresholds, zero intervals and duplicate names; drops
	/// group entries that name no configured signature.
	pub fn validate(&mut self) -> Result<()> {
		let intervals = [
			("schedule.heartbeatMs", self.schedule.heartbeat_ms),
			("schedule.staleLoginMs", self.schedule.stale_login_ms),
			("schedule.stuckStateMs", self.schedule.stuck_state_ms),
			("schedule.crashCheckMs", self.schedule.crash_check_ms),
		];
		if let Some((key, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
			return Err(EngineError::Config(format!("{key} must be non-zero")));
		}
		if self.login.max_challenge_attempts == 0 {
			return Err(EngineError::Config("login.maxChallengeAttempts must be at least 1".into()));
		}

		let mut names = HashSet::new();
		for signature in &self.screens.signatures {
			if !(signature.threshold > 0.0 && signature.threshold <= 1.0) {
				return Err(EngineError::Config(format!(
					"screen {} threshold {} outside (0, 1]",
					signature.name, signature.threshold
				)));
			}
			if !names.insert(signature.name.as_str()) {
				return Err(EngineError::Config(format!("duplicate screen name {}", signature.name)));
			}
		}

		let known: HashSet<String> = names.into_iter().map(str::to_string).collect();
		let has_signatures = !known.is_empty();
		for (group, members) in [
			("terminal", &mut self.screens.terminal),
			("challengeRejected", &mut self.screens.challenge_rejected),
			("loginPrompt", &mut self.screens.login_prompt),
		] {
			members.retain(|name| {
				let keep = !has_signatures || known.contains(name);
				if !keep {
					warn!(target = "warden.screen", group, screen = %name, "group names an unknown screen; ignored");
				}
				keep
			});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_document_yields_defaults() {
		let mut config: EngineConfig = serde_json::from_str("{}").unwrap();
		config.validate().unwrap();
		assert_eq!(config.watchdog.processing_timeout(), Duration::from_secs(180));
		assert_eq!(config.restart.drain_cooldown(), Duration::from_secs(5));
		assert_eq!(config.screens.terminal, ["SESS1", "SESS2", "SITE", "RESET"]);
		assert_eq!(config.login.max_challenge_attempts, 3);
		assert_eq!(config.http.bind, "127.0.0.1:8089");
	}

	#[test]
	fn partial_sections_keep_remaining_defaults() {
		let raw = r#"{"timeouts": {"screenshotMs": 2500}, "browser": {"args": ["--lang=id", "--no-sandbox"]}}"#;
		let config: EngineConfig = serde_json::from_str(raw).unwrap();
		assert_eq!(config.timeouts.screenshot(), Duration::from_millis(2500));
		assert_eq!(config.timeouts.navigation(), Duration::from_secs(60));

		let options = config.browser.launch_options();
		assert!(options.args.iter().any(|a| a == "--disable-gpu"));
		assert_eq!(options.args.iter().filter(|a| *a == "--no-sandbox").count(), 1);
		assert!(options.args.iter().any(|a| a == "--lang=id"));
	}

	#[test]
	fn invalid_threshold_and_duplicates_are_rejected() {
		let raw = r#"{"screens": {"signatures": [{"name": "A", "path": "a.png", "threshold": 1.5}]}}"#;
		let mut config: EngineConfig = serde_json::from_str(raw).unwrap();
		assert!(matches!(config.validate(), Err(EngineError::Config(_))));

		let raw = r#"{"screens": {"signatures": [{"name": "A", "path": "a.png"}, {"name": "A", "path": "b.png"}]}}"#;
		let mut config: EngineConfig = serde_json::from_str(raw).unwrap();
		assert!(config.validate().unwrap_err().to_string().contains("duplicate"));
	}

	#[test]
	fn unknown_group_members_are_dropped() {
		let raw = r#"{"screens": {"signatures": [{"name": "SESS1", "path": "s.png"}], "terminal": ["SESS1", "NOPE"]}}"#;
		let mut config: EngineConfig = serde_json::from_str(raw).unwrap();
		config.validate().unwrap();
		assert_eq!(config.screens.terminal, ["SESS1"]);
		assert!(config.screens.login_prompt.is_empty());
	}

	#[test]
	fn zero_interval_is_rejected() {
		let mut config: EngineConfig = serde_json::from_str(r#"{"schedule": {"crashCheckMs": 0}}"#).unwrap();
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("schedule.crashCheckMs"));
	}

	#[test]
	fn load_resolves_signature_paths_against_config_dir() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("warden.json");
		std::fs::write(&path, r#"{"screens": {"signatures": [{"name": "LOGIN", "path": "screens/login.png", "threshold": 0.8}]}}"#)
			.unwrap();
		let config = EngineConfig::load(&path).unwrap();
		assert_eq!(config.screens.signatures[0].path, dir.path().join("screens/login.png"));
		assert_eq!(config.screens.signatures[0].threshold, 0.8);
	}
}
