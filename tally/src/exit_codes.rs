//! Stable exit codes for tally commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid template, missing run directory, git failure or any other error.
pub const INVALID: i32 = 1;
/// The run's `tally-check` script exited non-zero.
pub const PRECHECK_FAILED: i32 = 3;
