//! Named top-level units of CI work.

use std::fmt;

use anyhow::Result;

use crate::step::CommandContext;

type Body = Box<dyn Fn(&mut CommandContext<'_>) -> Result<()>>;

/// A registered command: a name matched against the invocation argument and a
/// body that issues its steps through the [`CommandContext`].
///
/// An `Err` returned from the body (rather than from a step) is an error
/// outside any step and ends the process with the unexpected-error code.
pub struct Command {
    name: String,
    body: Body,
}

impl Command {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut CommandContext<'_>) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(&self, ctx: &mut CommandContext<'_>) -> Result<()> {
        (self.body)(ctx)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("name", &self.name).finish_non_exhaustive()
    }
}
