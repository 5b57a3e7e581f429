//! Build scripts declared as TOML (`ci.toml`).
//!
//! ```toml
//! [settings]
//! tool_timeout_secs = 600
//!
//! [[command]]
//! name = "build"
//!
//! [[command.step]]
//! name = "compile"
//!
//! [[command.step.tool]]
//! program = "cargo"
//! args = ["build", "--release"]
//!
//! [[command.step.tool.filter]]
//! pattern = "^$"
//!
//! [[command.step]]
//! name = "notify"
//! when = "always"
//!
//! [[command.step.tool]]
//! shell = "echo done"
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::command::Command;
use crate::core::filter::Filter;
use crate::core::types::StepWhen;
use crate::dispatch::Pipeline;
use crate::io::config::RunnerConfig;
use crate::io::process::ToolInvocation;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptFile {
    #[serde(default)]
    pub settings: RunnerConfig,
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub name: String,
    #[serde(default)]
    pub when: StepWhen,
    #[serde(default, rename = "tool")]
    pub tools: Vec<ToolSpec>,
}

/// One tool run. Exactly one of `shell` and `program` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    pub shell: Option<String>,
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub discard_stderr: bool,
    /// Overrides `settings.tool_timeout_secs`; `0` disables the timeout.
    pub timeout_secs: Option<u64>,
    #[serde(default, rename = "filter")]
    pub filters: Vec<FilterSpec>,
}

/// One output filter. Exactly one of `contains` and `pattern` must be set;
/// without `replace` matching lines are suppressed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    pub contains: Option<String>,
    pub pattern: Option<String>,
    pub replace: Option<String>,
}

/// Read, parse, and validate a script file.
pub fn load_script(path: &Path) -> Result<ScriptFile> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_script(&contents).with_context(|| format!("load {}", path.display()))
}

pub fn parse_script(contents: &str) -> Result<ScriptFile> {
    let script: ScriptFile = toml::from_str(contents).context("parse script toml")?;
    script.validate()?;
    debug!(commands = script.commands.len(), "loaded script");
    Ok(script)
}

impl ScriptFile {
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        let mut seen = BTreeSet::new();
        for command in &self.commands {
            if command.name.trim().is_empty() {
                bail!("command name must not be empty");
            }
            if !seen.insert(command.name.as_str()) {
                bail!("duplicate command name '{}'", command.name);
            }
            for step in &command.steps {
                if step.name.trim().is_empty() {
                    bail!("command '{}' has a step without a name", command.name);
                }
                for tool in &step.tools {
                    tool.validate().with_context(|| {
                        format!("command '{}', step '{}'", command.name, step.name)
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Register every command with a pipeline configured from `settings`.
    pub fn into_pipeline(self) -> Pipeline {
        let default_timeout = self.settings.default_tool_timeout();
        let pipeline = Pipeline::new()
            .with_log_root(self.settings.resolved_log_dir())
            .with_color(self.settings.color.enabled());
        self.commands
            .into_iter()
            .fold(pipeline, |pipeline, spec| {
                pipeline.command(spec.into_command(default_timeout))
            })
    }
}

struct ScriptStep {
    name: String,
    when: StepWhen,
    tools: Vec<ToolInvocation>,
}

impl CommandSpec {
    fn into_command(self, default_timeout: Option<Duration>) -> Command {
        let steps: Vec<ScriptStep> = self
            .steps
            .into_iter()
            .map(|step| ScriptStep {
                tools: step
                    .tools
                    .iter()
                    .map(|tool| tool.to_invocation(default_timeout))
                    .collect(),
                name: step.name,
                when: step.when,
            })
            .collect();
        Command::new(self.name, move |ctx| {
            for step in &steps {
                ctx.step(&step.name, step.when, |log| {
                    for tool in &step.tools {
                        tool.run(log)?;
                    }
                    Ok(())
                });
            }
            Ok(())
        })
    }
}

impl ToolSpec {
    fn validate(&self) -> Result<()> {
        match (&self.shell, &self.program) {
            (Some(_), Some(_)) => bail!("tool sets both 'shell' and 'program'"),
            (None, None) => bail!("tool needs 'shell' or 'program'"),
            (Some(line), None) if line.trim().is_empty() => bail!("tool 'shell' is empty"),
            (None, Some(program)) if program.trim().is_empty() => {
                bail!("tool 'program' is empty")
            }
            (Some(_), None) if !self.args.is_empty() => {
                bail!("'args' only applies to 'program' tools")
            }
            _ => {}
        }
        for filter in &self.filters {
            filter.validate()?;
        }
        Ok(())
    }

    pub fn to_invocation(&self, default_timeout: Option<Duration>) -> ToolInvocation {
        let mut invocation = match (&self.shell, &self.program) {
            (Some(line), _) => ToolInvocation::shell(line.clone()),
            (None, program) => {
                ToolInvocation::new(program.clone().unwrap_or_default(), self.args.clone())
            }
        };
        invocation = invocation.with_filters(
            self.filters
                .iter()
                .map(FilterSpec::to_filter)
                .collect::<Vec<_>>(),
        );
        if self.allow_failure {
            invocation = invocation.allow_failure();
        }
        if self.discard_stderr {
            invocation = invocation.discard_stderr();
        }
        let timeout = match self.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => default_timeout,
        };
        if let Some(timeout) = timeout {
            invocation = invocation.with_timeout(timeout);
        }
        invocation
    }
}

impl FilterSpec {
    fn validate(&self) -> Result<()> {
        match (&self.contains, &self.pattern) {
            (Some(_), Some(_)) => bail!("filter sets both 'contains' and 'pattern'"),
            (None, None) => bail!("filter needs 'contains' or 'pattern'"),
            _ => Ok(()),
        }
    }

    pub fn to_filter(&self) -> Filter {
        match (&self.contains, &self.pattern, &self.replace) {
            (Some(needle), _, Some(text)) => Filter::replace_containing(needle, text),
            (Some(needle), _, None) => Filter::suppress_containing(needle),
            (None, pattern, Some(text)) => {
                Filter::replace_matching(pattern.clone().unwrap_or_default(), text)
            }
            (None, pattern, None) => Filter::suppress_matching(pattern.clone().unwrap_or_default()),
        }
    }
}
