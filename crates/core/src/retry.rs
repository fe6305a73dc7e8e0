//! Bounded retry around an external challenge solve.
//!
//! [`RetrySolver`] only reports whether the attempts ran out. Whether
//! exhaustion skips one item or crashes the engine is the caller's call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub per_attempt_delay: Duration,
}

impl RetryPolicy {
	pub fn new(max_attempts: u32, per_attempt_delay: Duration) -> Self {
		Self {
			max_attempts,
			per_attempt_delay,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
	Success,
	/// Stopped early on something other than a rejected answer.
	SoftFail,
	/// Every attempt was rejected.
	FatalFail,
}

/// What the target showed after an answer was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
	Accepted,
	/// The challenge-rejected screen; a fresh challenge may be tried.
	Rejected,
	/// Some other condition that retrying will not fix.
	Aborted(String),
}

/// Site side of a challenge: fetching it, answering it, and clearing a
/// rejection before the next attempt.
#[async_trait]
pub trait ChallengeFlow: Send + Sync {
	async fn fetch_challenge(&self) -> Result<Vec<u8>>;
	async fn submit(&self, answer: &str) -> Result<Verdict>;
	async fn clear_rejection(&self) -> Result<()> {
		Ok(())
	}
}

/// External collaborator that reads a challenge image.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
	/// `None` when the solver could not produce an answer.
	async fn solve(&self, challenge: &[u8]) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct RetrySolver {
	solver: Arc<dyn ChallengeSolver>,
}

impl RetrySolver {
	pub fn new(solver: Arc<dyn ChallengeSolver>) -> Self {
		Self { solver }
	}

	pub async fn solve(&self, policy: RetryPolicy, flow: &dyn ChallengeFlow) -> SolveOutcome {
		for attempt in 1..=policy.max_attempts {
			if attempt > 1 && !policy.per_attempt_delay.is_zero() {
				tokio::time::sleep(policy.per_attempt_delay).await;
			}

			let challenge = match flow.fetch_challenge().await {
				Ok(challenge) => challenge,
				Err(err) => {
					warn!(target = "warden.retry", attempt, error = %err, "challenge fetch failed");
					return SolveOutcome::SoftFail;
				}
			};

			let answer = match self.solver.solve(&challenge).await {
				Ok(Some(answer)) => answer,
				Ok(None) => {
					info!(target = "warden.retry", attempt, "solver returned no answer");
					String::new()
				}
				Err(err) => {
					warn!(target = "warden.retry", attempt, error = %err, "solver call failed");
					String::new()
				}
			};

			match flow.submit(&answer).await {
				Ok(Verdict::Accepted) => {
					debug!(target = "warden.retry", attempt, "challenge accepted");
					return SolveOutcome::Success;
				}
				Ok(Verdict::Rejected) => {
					info!(target = "warden.retry", attempt, max = policy.max_attempts, "challenge rejected");
					if attempt < policy.max_attempts {
						if let Err(err) = flow.clear_rejection().await {
							warn!(target = "warden.retry", attempt, error = %err, "could not clear rejection");
						}
					}
				}
				Ok(Verdict::Aborted(reason)) => {
					warn!(target = "warden.retry", attempt, %reason, "challenge aborted");
					return SolveOutcome::SoftFail;
				}
				Err(err) => {
					warn!(target = "warden.retry", attempt, error = %err, "submit failed");
					return SolveOutcome::SoftFail;
				}
			}
		}

		warn!(target = "warden.retry", attempts = policy.max_attempts, "challenge attempts exhausted");
		SolveOutcome::FatalFail
	}
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;
	use std::sync::atomic::{AtomicU32, Ordering};

	use parking_lot::Mutex;

	use super::*;
	use crate::error::EngineError;

	struct ScriptedFlow {
		fetches: AtomicU32,
		submits: AtomicU32,
		clears: AtomicU32,
		verdicts: Mutex<VecDeque<Verdict>>,
		answers: Mutex<Vec<String>>,
	}

	impl ScriptedFlow {
		fn new(verdicts: impl IntoIterator<Item = Verdict>) -> Self {
			Self {
				fetches: AtomicU32::new(0),
				submits: AtomicU32::new(0),
				clears: AtomicU32::new(0),
				verdicts: Mutex::new(verdicts.into_iter().collect()),
				answers: Mutex::new(Vec::new()),
			}
		}
	}

	#[async_trait]
	impl ChallengeFlow for ScriptedFlow {
		async fn fetch_challenge(&self) -> Result<Vec<u8>> {
			let n = self.fetches.fetch_add(1, Ordering::SeqCst);
			Ok(vec![n as u8])
		}

		async fn submit(&self, answer: &str) -> Result<Verdict> {
			self.submits.fetch_add(1, Ordering::SeqCst);
			self.answers.lock().push(answer.to_string());
			Ok(self.verdicts.lock().pop_front().unwrap_or(Verdict::Rejected))
		}

		async fn clear_rejection(&self) -> Result<()> {
			self.clears.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	struct EchoSolver;

	#[async_trait]
	impl ChallengeSolver for EchoSolver {
		async fn solve(&self, challenge: &[u8]) -> Result<Option<String>> {
			Ok(Some(format!("answer-{}", challenge[0])))
		}
	}

	struct BrokenSolver;

	#[async_trait]
	impl ChallengeSolver for BrokenSolver {
		async fn solve(&self, _challenge: &[u8]) -> Result<Option<String>> {
			Err(EngineError::Solver("unreachable".into()))
		}
	}

	fn policy(max: u32) -> RetryPolicy {
		RetryPolicy::new(max, Duration::ZERO)
	}

	#[tokio::test]
	async fn always_rejected_runs_exactly_max_attempts() {
		let flow = ScriptedFlow::new([]);
		let outcome = RetrySolver::new(Arc::new(EchoSolver)).solve(policy(3), &flow).await;
		assert_eq!(outcome, SolveOutcome::FatalFail);
		assert_eq!(flow.fetches.load(Ordering::SeqCst), 3);
		assert_eq!(flow.submits.load(Ordering::SeqCst), 3);
		assert_eq!(flow.clears.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn each_attempt_uses_a_fresh_challenge() {
		let flow = ScriptedFlow::new([Verdict::Rejected, Verdict::Accepted]);
		let outcome = RetrySolver::new(Arc::new(EchoSolver)).solve(policy(3), &flow).await;
		assert_eq!(outcome, SolveOutcome::Success);
		assert_eq!(*flow.answers.lock(), ["answer-0", "answer-1"]);
	}

	#[tokio::test]
	async fn aborted_verdict_stops_without_exhausting() {
		let flow = ScriptedFlow::new([Verdict::Aborted("SESS1".into())]);
		let outcome = RetrySolver::new(Arc::new(EchoSolver)).solve(policy(3), &flow).await;
		assert_eq!(outcome, SolveOutcome::SoftFail);
		assert_eq!(flow.submits.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn solver_failure_consumes_an_attempt() {
		let flow = ScriptedFlow::new([Verdict::Rejected, Verdict::Rejected]);
		let outcome = RetrySolver::new(Arc::new(BrokenSolver)).solve(policy(2), &flow).await;
		assert_eq!(outcome, SolveOutcome::FatalFail);
		assert!(flow.answers.lock().iter().all(String::is_empty));
	}

	#[tokio::test(start_paused = true)]
	async fn delay_applies_between_attempts_only() {
		let flow = ScriptedFlow::new([]);
		let started = tokio::time::Instant::now();
		let outcome = RetrySolver::new(Arc::new(EchoSolver))
			.solve(RetryPolicy::new(3, Duration::from_secs(2)), &flow)
			.await;
		assert_eq!(outcome, SolveOutcome::FatalFail);
		assert_eq!(started.elapsed(), Duration::from_secs(4));
	}
}
