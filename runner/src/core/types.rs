//! Shared deterministic types for step execution.
//!
//! These types define stable contracts between the step executor, the
//! dispatcher, and script loading. They carry no I/O handles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When a step runs, relative to the failure state of its command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepWhen {
    /// Run only while no earlier step of the command has failed.
    #[default]
    OnSuccess,
    /// Run only once an earlier step of the command has failed.
    OnFailure,
    /// Run unconditionally.
    Always,
}

/// How a failed step's error was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A [`crate::BuildError`]: a tool or script reported a real failure.
    Classified,
    /// Any other error; usually a bug in the build script itself.
    Unexpected,
}

/// Result of a single step invocation.
///
/// A failed step never propagates its error past the step boundary; the
/// outcome is returned instead so the command can continue with its next step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The `when` policy filtered the step out; its body never ran.
    Skipped,
    /// The body completed without error.
    Finished { elapsed: Duration },
    /// The body failed. `message` is what was reported on the console.
    Failed { kind: FailureKind, message: String },
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped)
    }
}

/// One entry of a command's step history, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub when: StepWhen,
    pub outcome: StepOutcome,
}
