//! External check execution and check status reconciliation.
//!
//! Two halves cooperate to answer "did this out-of-process check run
//! correctly, and does its result still apply?":
//!
//! - **[`io::client`]**: launches an external step as a subprocess, hands it
//!   the orchestration context through a pluggable [`io::transport`] and reads
//!   back its structured messages.
//! - **[`checks`]**: resolves stored check executions against their run's
//!   lifecycle and hides results made stale by newer materializations.
//!
//! As elsewhere in the crate, **[`core`]** holds pure, deterministic logic and
//! **[`io`]** holds everything that touches processes, files or stores.

pub mod checks;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
