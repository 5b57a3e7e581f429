//! Step policy decisions and log line formatting.

use std::time::Duration;

use crate::core::types::StepWhen;

/// Decide whether a step body runs given the command's current failure state.
///
/// - `OnSuccess` runs only while `has_failed` is false.
/// - `OnFailure` runs only once `has_failed` is true.
/// - `Always` runs regardless.
pub fn should_run(when: StepWhen, has_failed: bool) -> bool {
    match when {
        StepWhen::OnSuccess => !has_failed,
        StepWhen::OnFailure => has_failed,
        StepWhen::Always => true,
    }
}

/// Format an elapsed duration in seconds with one decimal place (`"12.3"`).
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.1}", elapsed.as_secs_f64())
}

/// Wrap `line` between two `=` rules as wide as the line itself.
pub fn header_block(line: &str) -> String {
    let divider = "=".repeat(line.chars().count());
    format!("{divider}\n{line}\n{divider}")
}
