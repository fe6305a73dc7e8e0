use std::collections::HashSet;

use crate::config::ScreensConfig;

/// What a classified screen asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenAction {
	/// The target ended the session; only a rebuild recovers.
	Crash,
	/// The challenge answer was rejected; fetch a new challenge.
	RetryChallenge,
	/// The login form is showing.
	LoginPrompt,
	/// A known but non-fatal screen (maintenance banner, HTTP error page).
	Defer,
}

/// Maps signature names to recovery actions.
#[derive(Debug, Clone, Default)]
pub struct ScreenPolicy {
	terminal: HashSet<String>,
	challenge_rejected: HashSet<String>,
	login_prompt: HashSet<String>,
}

impl ScreenPolicy {
	pub fn from_config(config: &ScreensConfig) -> Self {
		Self {
			terminal: config.terminal.iter().cloned().collect(),
			challenge_rejected: config.challenge_rejected.iter().cloned().collect(),
			login_prompt: config.login_prompt.iter().cloned().collect(),
		}
	}

	pub fn action(&self, screen: &str) -> ScreenAction {
		if self.terminal.contains(screen) {
			ScreenAction::Crash
		} else if self.challenge_rejected.contains(screen) {
			ScreenAction::RetryChallenge
		} else if self.login_prompt.contains(screen) {
			ScreenAction::LoginPrompt
		} else {
			ScreenAction::Defer
		}
	}

	pub fn is_terminal(&self, screen: &str) -> bool {
		self.terminal.contains(screen)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_groups_map_to_actions() {
		let policy = ScreenPolicy::from_config(&ScreensConfig::default());
		assert_eq!(policy.action("SESS2"), ScreenAction::Crash);
		assert_eq!(policy.action("RESET"), ScreenAction::Crash);
		assert_eq!(policy.action("CAP"), ScreenAction::RetryChallenge);
		assert_eq!(policy.action("LOGIN"), ScreenAction::LoginPrompt);
		assert_eq!(policy.action("LIMA"), ScreenAction::Defer);
		assert!(!policy.is_terminal("UTD1"));
	}
}
