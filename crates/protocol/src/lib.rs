//! Wire types for the warden session supervisor.
//!
//! This crate contains the serde-serializable shapes that leave the process:
//! the engine state snapshot returned by the status query, the heartbeat
//! payload pushed to the remote reporter, and the JSON envelope used by the
//! control surface.
//!
//! Types in this crate are pure data. Behavior lives in `warden`.

pub mod envelope;
pub mod heartbeat;
pub mod state;

pub use envelope::*;
pub use heartbeat::*;
pub use state::*;
