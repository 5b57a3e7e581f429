//! Console half of the build log: annotated, optionally colored lines on stdout.

use std::fmt;
use std::io::{self, IsTerminal, Write};

/// Determine if color output should be enabled.
///
/// Priority: `NO_COLOR=1` disables → `COLOR=1` forces → TTY check.
pub fn should_colorize() -> bool {
    if std::env::var("NO_COLOR").is_ok_and(|v| v == "1") {
        return false;
    }
    if std::env::var("COLOR").is_ok_and(|v| v == "1") {
        return true;
    }
    io::stdout().is_terminal()
}

/// Semantic styles used on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paint {
    /// Success marker (green).
    Success,
    /// Completion marker and skipped step names (yellow).
    Highlight,
    /// `<Warning>` marker (bold yellow).
    Warning,
    /// `<Error>` marker and failed step names (bold red).
    Error,
    /// Step names while entering/finishing (cyan).
    Name,
}

impl Paint {
    fn code(self) -> &'static str {
        match self {
            Paint::Success => "32",
            Paint::Highlight => "33",
            Paint::Warning => "1;33",
            Paint::Error => "1;31",
            Paint::Name => "36",
        }
    }
}

const RESET: &str = "\x1b[0m";

/// Line-oriented console writer. Every line is flushed immediately so it
/// interleaves correctly with the timing of running tools.
pub struct Console {
    out: Box<dyn Write + Send>,
    color: bool,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static, color: bool) -> Self {
        Self {
            out: Box::new(out),
            color,
        }
    }

    pub fn stdout(color: bool) -> Self {
        Self::new(io::stdout(), color)
    }

    pub fn color(&self) -> bool {
        self.color
    }

    /// Decorate `text` with `paint` when colors are enabled.
    pub fn paint(&self, text: &str, paint: Paint) -> String {
        if self.color {
            format!("\x1b[{}m{}{}", paint.code(), text, RESET)
        } else {
            text.to_string()
        }
    }

    pub fn line(&mut self, text: &str) {
        // Console write errors are ignored.
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SharedBuffer;

    #[test]
    fn plain_console_writes_undecorated_lines() {
        let buffer = SharedBuffer::default();
        let mut console = Console::new(buffer.clone(), false);
        let name = console.paint("compile", Paint::Name);
        console.line(&format!("Entering step [{name}]"));
        assert_eq!(buffer.contents(), "Entering step [compile]\n");
    }

    #[test]
    fn colored_console_wraps_text_in_ansi_codes() {
        let console = Console::new(SharedBuffer::default(), true);
        assert_eq!(
            console.paint("<Error>", Paint::Error),
            "\x1b[1;31m<Error>\x1b[0m"
        );
    }
}
