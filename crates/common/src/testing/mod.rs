//! Testing utilities for code built on the resilience layer
//!
//! - **[`assertions`]**: float and duration assertions for timing tests
//! - **[`mocks`]**: scripted operations and status-carrying responses
//!
//! ## Usage
//!
//! ```rust
//! use trialflow_common::testing::ScriptedOperation;
//!
//! let op = ScriptedOperation::new().then_transient().then_ok("study");
//! assert!(op.call().is_err());
//! assert_eq!(op.call(), Ok("study"));
//! assert_eq!(op.calls(), 2);
//! ```

pub mod assertions;
pub mod mocks;

pub use assertions::{assert_approx_eq, assert_duration_in_range};
pub use mocks::{ScriptedError, ScriptedOperation, StatusResponse};
pub use tokio_test::{assert_err, assert_ok};
