//! Supervisory core for a long-lived browser session.
//!
//! The [`Engine`] owns one browser session through the
//! [`SessionLifecycleManager`], tracks its lifecycle in an
//! [`EngineStateStore`], recognises known screens with a
//! [`ScreenClassifier`], and is watched over by a [`Supervisor`] running four
//! periodic tasks.

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod login;
pub mod reporter;
pub mod retry;
pub mod screen;
pub mod session;
pub mod solver;
pub mod state;
pub mod supervisor;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, LoginResult, Rejection, SessionRestart, WorkflowGuard};
pub use error::{EngineError, ErrorKind, Result};
pub use login::{FormLogin, LoginFlow, LoginOutcome};
pub use reporter::{DisabledReporter, HttpReporter, RemoteReporter};
pub use retry::{ChallengeFlow, ChallengeSolver, RetryPolicy, RetrySolver, SolveOutcome, Verdict};
pub use screen::{ScreenClassifier, ScreenMatch, ScreenPolicy, TemplateClassifier};
pub use session::{RestartOutcome, SessionLifecycleManager, SessionPhase};
pub use state::{Claim, EngineStateStore};
pub use supervisor::{Supervisor, Task};
