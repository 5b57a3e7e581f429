//! Selecting a registered command by name and running it end to end.
//!
//! The dispatcher owns the per-command build log: it opens the durable file
//! before the command body runs and closes it on every exit path, then maps
//! the command's result to one of the [`crate::exit_codes`].

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::command::Command;
use crate::exit_codes;
use crate::io::build_log::BuildLog;
use crate::io::console::{Console, should_colorize};
use crate::io::temp_dir;
use crate::logging;
use crate::staleness;
use crate::step::{CommandContext, describe_failure};

/// Process-wide setup shared by every entry point: development tracing, then
/// the outdated-executable check (which may exit the process).
pub fn prepare_process() {
    logging::init();
    staleness::exit_if_outdated();
}

/// What [`Pipeline::dispatch`] did with the invocation argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// No registered command has that name; nothing ran.
    NoMatch,
    /// The named command ran and finished with `exit_code`.
    Completed { command: String, exit_code: i32 },
}

impl DispatchResult {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            DispatchResult::NoMatch => None,
            DispatchResult::Completed { exit_code, .. } => Some(*exit_code),
        }
    }
}

/// Commands registered by a build script, in registration order.
#[derive(Debug)]
pub struct Pipeline {
    commands: Vec<Command>,
    log_root: PathBuf,
    color: bool,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            log_root: temp_dir::default_root(),
            color: should_colorize(),
        }
    }

    /// Register a command. The first command registered under a name wins.
    pub fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(Command::name)
    }

    pub fn find(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|command| command.name() == name)
    }

    /// Run the first command named `argument`, writing to stdout.
    pub fn dispatch(&self, argument: Option<&str>) -> DispatchResult {
        self.dispatch_with(argument, Console::stdout(self.color))
    }

    /// Run the first command named `argument`, writing console output to `console`.
    pub fn dispatch_with(&self, argument: Option<&str>, console: Console) -> DispatchResult {
        let Some(command) = argument.and_then(|name| self.find(name)) else {
            debug!(argument = ?argument, "no command matches invocation");
            return DispatchResult::NoMatch;
        };
        let exit_code = self.run_command(command, console);
        DispatchResult::Completed {
            command: command.name().to_string(),
            exit_code,
        }
    }

    /// Entry point for build scripts written in Rust: dispatch on the first
    /// process argument and exit with the resulting code.
    ///
    /// ```no_run
    /// use ci_runner::{Command, Pipeline, StepWhen, ToolInvocation};
    ///
    /// fn main() {
    ///     Pipeline::new()
    ///         .command(Command::new("build", |ctx| {
    ///             ctx.step("compile", StepWhen::OnSuccess, |log| {
    ///                 ToolInvocation::new("cargo", ["build", "--release"]).run(log)?;
    ///                 Ok(())
    ///             });
    ///             ctx.step("notify", StepWhen::Always, |log| {
    ///                 log.success("build finished");
    ///                 Ok(())
    ///             });
    ///             Ok(())
    ///         }))
    ///         .main()
    /// }
    /// ```
    pub fn main(self) -> ! {
        prepare_process();
        let argument = std::env::args().nth(1);
        let code = self.exit_code_for(argument.as_deref(), Console::stdout(self.color));
        std::process::exit(code)
    }

    /// Exit code for a library entry point: an unmatched argument runs nothing
    /// and counts as success.
    pub fn exit_code_for(&self, argument: Option<&str>, console: Console) -> i32 {
        self.dispatch_with(argument, console)
            .exit_code()
            .unwrap_or(exit_codes::OK)
    }

    #[instrument(skip_all, fields(command = %command.name()))]
    fn run_command(&self, command: &Command, console: Console) -> i32 {
        let mut log = BuildLog::new(console, &self.log_root);
        if let Err(err) = log.open(command.name()) {
            let (_, message) = describe_failure(&anyhow::Error::from(err));
            log.error(&message);
            return exit_codes::UNEXPECTED;
        }

        let (result, failed) = {
            let mut ctx = CommandContext::new(command.name(), &mut log);
            let result = command.run(&mut ctx);
            (result, ctx.has_failed())
        };

        let code = match result {
            Err(err) => {
                let (kind, message) = describe_failure(&err);
                debug!(?kind, error = %message, "error escaped command body");
                log.error(&message);
                exit_codes::UNEXPECTED
            }
            Ok(()) if failed => exit_codes::STEP_FAILED,
            Ok(()) => exit_codes::OK,
        };
        log.close();
        info!(exit_code = code, "command finished");
        code
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::anyhow;

    use super::*;
    use crate::core::types::StepWhen;
    use crate::error::BuildError;
    use crate::test_support::SharedBuffer;

    fn pipeline(root: &Path) -> Pipeline {
        Pipeline::new()
            .with_log_root(root)
            .with_color(false)
            .command(Command::new("ok", |ctx| {
                ctx.step("noop", StepWhen::OnSuccess, |_| Ok(()));
                Ok(())
            }))
            .command(Command::new("fails", |ctx| {
                ctx.step("boom", StepWhen::OnSuccess, |_| {
                    Err(BuildError::message("boom").into())
                });
                Ok(())
            }))
            .command(Command::new("escapes", |_| Err(anyhow!("setup broke"))))
            .command(Command::new("ok", |_| Err(anyhow!("shadowed"))))
    }

    fn run(pipeline: &Pipeline, argument: Option<&str>) -> (DispatchResult, String) {
        let buffer = SharedBuffer::default();
        let result = pipeline.dispatch_with(argument, Console::new(buffer.clone(), false));
        (result, buffer.contents())
    }

    #[test]
    fn unknown_or_missing_argument_does_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(temp.path());
        assert_eq!(run(&pipeline, Some("deploy")), (DispatchResult::NoMatch, String::new()));
        assert_eq!(run(&pipeline, None).0, DispatchResult::NoMatch);
        assert!(!temp.path().exists() || fs::read_dir(temp.path()).expect("read").next().is_none());
    }

    #[test]
    fn maps_outcomes_to_exit_codes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(temp.path());
        assert_eq!(run(&pipeline, Some("ok")).0.exit_code(), Some(exit_codes::OK));
        assert_eq!(run(&pipeline, Some("fails")).0.exit_code(), Some(exit_codes::STEP_FAILED));

        let (result, console) = run(&pipeline, Some("escapes"));
        assert_eq!(result.exit_code(), Some(exit_codes::UNEXPECTED));
        assert!(console.contains("<Error> Unexpected error occurred: setup broke"));
    }

    #[test]
    fn library_entry_exit_codes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(temp.path());
        let quiet = || Console::new(SharedBuffer::default(), false);
        assert_eq!(pipeline.exit_code_for(None, quiet()), exit_codes::OK);
        assert_eq!(pipeline.exit_code_for(Some("deploy"), quiet()), exit_codes::OK);
        assert_eq!(pipeline.exit_code_for(Some("fails"), quiet()), exit_codes::STEP_FAILED);
        assert_eq!(pipeline.exit_code_for(Some("escapes"), quiet()), exit_codes::UNEXPECTED);
    }

    #[test]
    fn first_registered_command_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let names: Vec<_> = pipeline(temp.path()).names().map(str::to_string).collect();
        assert_eq!(names, ["ok", "fails", "escapes", "ok"]);
        let (result, _) = run(&pipeline(temp.path()), Some("ok"));
        assert_eq!(
            result,
            DispatchResult::Completed {
                command: "ok".to_string(),
                exit_code: exit_codes::OK
            }
        );
    }

    #[test]
    fn unwritable_log_root_is_unexpected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("file");
        fs::write(&blocker, "not a dir").expect("write");
        let pipeline = pipeline(&blocker);

        let (result, console) = run(&pipeline, Some("ok"));
        assert_eq!(result.exit_code(), Some(exit_codes::UNEXPECTED));
        assert!(console.contains("<Error> Failed to create directory"));
        assert!(!console.contains("Entering step"));
    }

    #[test]
    fn log_is_closed_after_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, console) = run(&pipeline(temp.path()), Some("fails"));
        let path = console
            .lines()
            .find_map(|line| line.strip_prefix("Saving full log to "))
            .expect("log path line");
        let durable = fs::read_to_string(path).expect("read log");
        assert!(durable.contains("Entering step [boom]"));
        assert!(durable.ends_with("Step [boom] failed\n\n"));
    }
}
