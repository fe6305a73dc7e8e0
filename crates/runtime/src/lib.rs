//! Browser driver seam for warden.
//!
//! The supervisory core drives one exclusive browser session through the
//! [`Driver`] → [`Platform`] → [`Browser`] → [`Page`] traits. Two backends
//! implement them:
//!
//! - [`cdp::CdpDriver`]: a local Chromium-family browser over the Chrome
//!   DevTools Protocol
//! - [`fake::FakeDriver`]: an in-memory, scriptable backend for tests
//!
//! Every page operation carries an explicit timeout.

pub mod cdp;
pub mod driver;
pub mod error;
pub mod fake;
pub mod process;

pub use driver::{Browser, Driver, LaunchOptions, Page, Platform};
pub use error::{Result, RuntimeError};
