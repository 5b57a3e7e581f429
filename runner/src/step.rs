//! Running one named step of a command under its `when` policy.
//!
//! The step executor is the single recovery boundary: errors raised by a step
//! body are classified, reported, and latched into the [`CommandContext`], then
//! turned into a [`StepOutcome`]. Nothing above a step ever sees the error.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::policy::should_run;
use crate::core::types::{FailureKind, StepOutcome, StepRecord, StepWhen};
use crate::error::BuildError;
use crate::io::build_log::BuildLog;

const UNEXPECTED_PREFIX: &str = "Unexpected error occurred";

/// Execution state of the command currently running its steps.
///
/// Owned by the dispatcher for the duration of one command and passed by
/// reference into every step; there is no ambient "current command".
pub struct CommandContext<'a> {
    name: String,
    failed: bool,
    log: &'a mut BuildLog,
    history: Vec<StepRecord>,
}

impl<'a> CommandContext<'a> {
    pub fn new(name: impl Into<String>, log: &'a mut BuildLog) -> Self {
        Self {
            name: name.into(),
            failed: false,
            log,
            history: Vec::new(),
        }
    }

    /// A context that belongs to no command. It starts out failed, so only
    /// `on_failure` and `always` steps run in it.
    pub fn detached(log: &'a mut BuildLog) -> Self {
        Self {
            name: String::new(),
            failed: true,
            log,
            history: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Latch the command as failed. There is no way to reset it.
    pub fn record_failure(&mut self) {
        if !self.failed {
            debug!(command = %self.name, "command marked failed");
        }
        self.failed = true;
    }

    pub fn log(&mut self) -> &mut BuildLog {
        &mut *self.log
    }

    /// Steps run so far, in execution order.
    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    /// Shorthand for [`run_step`] on this context.
    pub fn step<F>(&mut self, name: &str, when: StepWhen, body: F) -> StepOutcome
    where
        F: FnOnce(&mut BuildLog) -> Result<()>,
    {
        run_step(self, name, when, body)
    }

    fn finish(&mut self, name: &str, when: StepWhen, outcome: StepOutcome) -> StepOutcome {
        self.history.push(StepRecord {
            name: name.to_string(),
            when,
            outcome: outcome.clone(),
        });
        outcome
    }
}

/// Run `body` as the step `name` unless `when` filters it out.
///
/// Output and timing go to both sinks of the context's build log. A failing
/// body marks the command failed; the error is reported on the console and
/// returned as [`StepOutcome::Failed`].
#[instrument(skip_all, fields(command = %ctx.name, step = name))]
pub fn run_step<F>(ctx: &mut CommandContext<'_>, name: &str, when: StepWhen, body: F) -> StepOutcome
where
    F: FnOnce(&mut BuildLog) -> Result<()>,
{
    if !should_run(when, ctx.failed) {
        debug!(?when, failed = ctx.failed, "step skipped");
        if let Err(err) = ctx.log.skipped_step(name) {
            warn!(error = %err, "failed to log skipped step");
        }
        return ctx.finish(name, when, StepOutcome::Skipped);
    }

    let outcome = match execute(ctx.log, name, body) {
        Ok(elapsed) => {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "step finished");
            StepOutcome::Finished { elapsed }
        }
        Err(err) => {
            let (kind, message) = describe_failure(&err);
            debug!(?kind, error = %message, "step failed");
            ctx.record_failure();
            ctx.log.error(&message);
            if let Err(err) = ctx.log.failed_step(name) {
                warn!(error = %err, "failed to log failed step");
            }
            StepOutcome::Failed { kind, message }
        }
    };
    ctx.finish(name, when, outcome)
}

fn execute<F>(log: &mut BuildLog, name: &str, body: F) -> Result<Duration>
where
    F: FnOnce(&mut BuildLog) -> Result<()>,
{
    log.entering_step(name)?;
    let started = Instant::now();
    body(log)?;
    let elapsed = started.elapsed();
    log.finished_step(name, elapsed)?;
    Ok(elapsed)
}

/// Classify `err` and build the console message for it.
pub(crate) fn describe_failure(err: &anyhow::Error) -> (FailureKind, String) {
    let kind = classify(err);
    let message = match kind {
        FailureKind::Classified => format!("{err:#}"),
        FailureKind::Unexpected => format!("{UNEXPECTED_PREFIX}: {err:#}"),
    };
    (kind, message)
}

/// Classified when a [`BuildError`] appears anywhere in the error chain.
pub fn classify(err: &anyhow::Error) -> FailureKind {
    if err.chain().any(|cause| cause.is::<BuildError>()) {
        FailureKind::Classified
    } else {
        FailureKind::Unexpected
    }
}
