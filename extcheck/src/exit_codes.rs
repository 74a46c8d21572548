//! Stable exit codes for extcheck CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, config, snapshot, or any other error.
pub const INVALID: i32 = 1;
/// `extcheck run`: the external process exited non-zero.
pub const EXTERNAL_FAILED: i32 = 2;
/// `extcheck latest`: no execution describes the latest materialization.
pub const NO_CURRENT_EXECUTION: i32 = 3;
