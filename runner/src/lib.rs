//! Step-execution and process-orchestration engine for CI build scripts.
//!
//! A script registers named [`command::Command`]s. Each command runs an ordered
//! sequence of steps under a conditional policy, and steps shell out to external
//! tools whose output is filtered for the console and kept verbatim in a durable
//! per-command build log.
//!
//! - **[`core`]**: Pure, deterministic logic (line filters, step policy, outcome types).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (console, build log file, process execution,
//!   git, environment).
//!
//! Orchestration modules ([`step`], [`command`], [`dispatch`], [`script`]) coordinate
//! core logic with I/O to run a command end to end.

pub mod command;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod script;
pub mod staleness;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use command::Command;
pub use crate::core::filter::{Filter, FilterChain};
pub use crate::core::types::{FailureKind, StepOutcome, StepWhen};
pub use dispatch::{DispatchResult, Pipeline};
pub use error::BuildError;
pub use io::build_log::BuildLog;
pub use io::process::ToolInvocation;
pub use step::{CommandContext, run_step};
