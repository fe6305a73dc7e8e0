//! Credential login against the target's form.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use warden_runtime::Page;

use crate::config::{Credentials, LoginSelectors, TimeoutConfig};
use crate::error::{EngineError, Result};
use crate::retry::{ChallengeFlow, RetryPolicy, RetrySolver, SolveOutcome, Verdict};
use crate::screen::{ScreenAction, ScreenClassifier, ScreenPolicy, classify_blocking};
use crate::solver::png_from_data_url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
	LoggedIn,
	Failed(String),
}

/// Site-specific login procedure run on an already-navigated page.
#[async_trait]
pub trait LoginFlow: Send + Sync {
	async fn login(&self, page: Arc<dyn Page>) -> Result<LoginOutcome>;
}

/// Fills the configured form and answers its image challenge through a
/// [`RetrySolver`].
pub struct FormLogin {
	selectors: LoginSelectors,
	credentials: Credentials,
	timeouts: TimeoutConfig,
	policy: RetryPolicy,
	retry: RetrySolver,
	classifier: Arc<dyn ScreenClassifier>,
	screens: ScreenPolicy,
}

impl FormLogin {
	pub fn new(
		selectors: LoginSelectors,
		credentials: Credentials,
		timeouts: TimeoutConfig,
		policy: RetryPolicy,
		retry: RetrySolver,
		classifier: Arc<dyn ScreenClassifier>,
		screens: ScreenPolicy,
	) -> Self {
		Self {
			selectors,
			credentials,
			timeouts,
			policy,
			retry,
			classifier,
			screens,
		}
	}
}

#[async_trait]
impl LoginFlow for FormLogin {
	async fn login(&self, page: Arc<dyn Page>) -> Result<LoginOutcome> {
		let flow = FormChallenge { form: self, page: page.as_ref() };
		let outcome = self.retry.solve(self.policy, &flow).await;
		info!(target = "warden.retry", ?outcome, "login challenge finished");
		Ok(match outcome {
			SolveOutcome::Success => LoginOutcome::LoggedIn,
			SolveOutcome::SoftFail => LoginOutcome::Failed("login aborted".into()),
			SolveOutcome::FatalFail => {
				let err = EngineError::Exhausted {
					attempts: self.policy.max_attempts,
				};
				warn!(target = "warden.retry", kind = ?err.kind(), error = %err, "login challenge exhausted");
				LoginOutcome::Failed("challenge attempts exhausted".into())
			}
		})
	}
}

struct FormChallenge<'a> {
	form: &'a FormLogin,
	page: &'a dyn Page,
}

#[async_trait]
impl ChallengeFlow for FormChallenge<'_> {
	async fn fetch_challenge(&self) -> Result<Vec<u8>> {
		let selector = &self.form.selectors.challenge_image;
		let element = self.form.timeouts.element();
		self.page.wait_for(selector, element).await?;
		match self.page.evaluate(&challenge_script(selector), element).await? {
			Value::String(data_url) if !data_url.is_empty() => png_from_data_url(&data_url),
			other => Err(EngineError::Solver(format!("challenge image not readable: {other}"))),
		}
	}

	async fn submit(&self, answer: &str) -> Result<Verdict> {
		let selectors = &self.form.selectors;
		let element = self.form.timeouts.element();
		self.page.fill(&selectors.username, &self.form.credentials.username, element).await?;
		self.page.fill(&selectors.password, &self.form.credentials.password, element).await?;
		self.page.fill(&selectors.challenge_answer, answer, element).await?;
		self.page.click(&selectors.submit, element).await?;

		let snapshot = self.page.screenshot(self.form.timeouts.screenshot()).await?;
		if let Some(found) = classify_blocking(Arc::clone(&self.form.classifier), snapshot).await {
			match self.form.screens.action(&found.name) {
				ScreenAction::RetryChallenge => return Ok(Verdict::Rejected),
				ScreenAction::Crash => return Ok(Verdict::Aborted(found.name)),
				ScreenAction::LoginPrompt | ScreenAction::Defer => {
					debug!(target = "warden.retry", screen = %found.name, "post-submit screen");
				}
			}
		}

		match self.page.wait_for(&selectors.landmark, element).await {
			Ok(()) => Ok(Verdict::Accepted),
			Err(err) if err.is_transient() => Ok(Verdict::Aborted("landmark not visible after submit".into())),
			Err(err) => Err(err.into()),
		}
	}

	async fn clear_rejection(&self) -> Result<()> {
		let dismiss = &self.form.selectors.dialog_dismiss;
		if self.page.is_visible(dismiss, self.form.timeouts.element()).await? {
			self.page.click(dismiss, self.form.timeouts.element()).await?;
		} else {
			warn!(target = "warden.retry", selector = %dismiss, "rejection dialog not found");
		}
		Ok(())
	}
}

/// Renders the challenge `<img>` onto a white canvas and returns it as a
/// JPEG data URL, or `null` when the element is missing.
pub fn challenge_script(selector: &str) -> String {
	let literal = Value::String(selector.to_string()).to_string();
	format!(
		"(() => {{ const img = document.querySelector({literal}); if (!img || !img.complete) return null; \
		 const scale = Math.min(1, 600 / img.naturalWidth, 600 / img.naturalHeight); \
		 const canvas = document.createElement('canvas'); \
		 canvas.width = Math.round(img.naturalWidth * scale); canvas.height = Math.round(img.naturalHeight * scale); \
		 const ctx = canvas.getContext('2d'); ctx.fillStyle = 'white'; ctx.fillRect(0, 0, canvas.width, canvas.height); \
		 ctx.drawImage(img, 0, 0, canvas.width, canvas.height); return canvas.toDataURL('image/jpeg', 0.9); }})()"
	)
}
