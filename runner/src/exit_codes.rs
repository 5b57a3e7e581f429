//! Stable exit codes for the `ci` process.

/// The command ran and no step failed.
pub const OK: i32 = 0;
/// At least one step reported a failure (handled at the step boundary).
pub const STEP_FAILED: i32 = 1;
/// An error escaped the command body outside of any step.
pub const UNEXPECTED: i32 = 2;
/// `ci` was invoked with a command name that no script registers.
pub const UNKNOWN_COMMAND: i32 = 3;
/// The running executable is older than its sources and must be rebuilt.
pub const OUTDATED: i32 = 222;
