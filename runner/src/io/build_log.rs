//! Dual-sink build log: filtered console output plus a durable, unfiltered file.
//!
//! The durable file is the full transcript of one command: step headers, every
//! tool invocation with its arguments, and every raw output line. The console
//! gets the annotated, filtered view. At most one durable file is open per
//! `BuildLog`; opening a new one closes the previous one first.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::policy::{format_elapsed, header_block};
use crate::error::BuildError;
use crate::io::console::{Console, Paint};
use crate::io::temp_dir::TemporaryDirectory;

const SUCCESS_SYMBOL: &str = "✔\u{fe0e}";
const COMPLETION_SYMBOL: &str = "▸";

struct OpenLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct BuildLog {
    console: Console,
    log_root: PathBuf,
    file: Option<OpenLog>,
}

impl BuildLog {
    /// Create a sink writing to `console`; durable logs go under `log_root`.
    pub fn new(console: Console, log_root: impl Into<PathBuf>) -> Self {
        Self {
            console,
            log_root: log_root.into(),
            file: None,
        }
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Path of the durable log currently open, if any.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|log| log.path.as_path())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Open a fresh durable log named after `name` in a unique directory.
    ///
    /// Any log that is still open is closed first.
    pub fn open(&mut self, name: &str) -> Result<PathBuf, BuildError> {
        let dir = TemporaryDirectory::new_in(&self.log_root, "$UUID")?;
        let path = dir.path().join(format!("{name}.log"));
        self.info(&format!("Saving full log to {}", path.display()));
        self.close();

        let file = File::create(&path).map_err(|source| BuildError::LogOpen {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "opened build log");
        self.file = Some(OpenLog {
            path: path.clone(),
            writer: BufWriter::new(file),
        });
        Ok(path)
    }

    /// Flush and release the durable log. Safe to call repeatedly; never fails.
    pub fn close(&mut self) {
        let Some(log) = self.file.take() else {
            return;
        };
        match log.writer.into_inner() {
            Ok(file) => {
                drop(file);
                debug!(path = %log.path.display(), "closed build log");
            }
            Err(err) => {
                warn!(path = %log.path.display(), error = %err.error(), "failed to flush build log");
                self.warning("Failed to close build log");
            }
        }
    }

    pub fn write_console(&mut self, line: &str) {
        self.console.line(line);
    }

    /// Append one raw line to the durable log. A no-op when no log is open.
    pub fn write_durable(&mut self, line: &str) -> Result<(), BuildError> {
        let Some(log) = self.file.as_mut() else {
            return Ok(());
        };
        writeln!(log.writer, "{line}")
            .and_then(|()| log.writer.flush())
            .map_err(BuildError::LogWrite)
    }

    /// Append `line` framed by `=` rules above and below.
    pub fn write_durable_header(&mut self, line: &str) -> Result<(), BuildError> {
        self.write_durable(&header_block(line))
    }

    /// Console line without decoration.
    pub fn info(&mut self, line: &str) {
        self.console.line(line);
    }

    pub fn success(&mut self, line: &str) {
        let symbol = self.console.paint(SUCCESS_SYMBOL, Paint::Success);
        self.console.line(&format!("{symbol} {line}"));
    }

    pub fn completion(&mut self, line: &str) {
        let symbol = self.console.paint(COMPLETION_SYMBOL, Paint::Highlight);
        self.console.line(&format!("{symbol} {line}"));
    }

    pub fn warning(&mut self, line: &str) {
        let marker = self.console.paint("<Warning>", Paint::Warning);
        self.console.line(&format!("{marker} {line}"));
    }

    pub fn error(&mut self, line: &str) {
        let marker = self.console.paint("<Error>", Paint::Error);
        self.console.line(&format!("{marker} {line}"));
    }

    /// A titled block of lines on the console, framed by blank lines.
    pub fn lines<S: AsRef<str>>(&mut self, title: &str, lines: &[S]) {
        self.completion(title);
        self.info("");
        for line in lines {
            self.info(line.as_ref());
        }
        self.info("");
    }

    pub(crate) fn entering_step(&mut self, name: &str) -> Result<(), BuildError> {
        let painted = self.console.paint(name, Paint::Name);
        self.info("");
        self.info(&format!("Entering step [{painted}]"));
        self.write_durable_header(&format!("Entering step [{name}]"))
    }

    pub(crate) fn skipped_step(&mut self, name: &str) -> Result<(), BuildError> {
        let painted = self.console.paint(name, Paint::Highlight);
        self.info("");
        self.info(&format!("Step [{painted}] was skipped"));
        self.write_durable_header(&format!("Step [{name}] was skipped"))
    }

    pub(crate) fn finished_step(&mut self, name: &str, elapsed: Duration) -> Result<(), BuildError> {
        let seconds = format_elapsed(elapsed);
        let painted = self.console.paint(name, Paint::Name);
        self.info(&format!("Finished step [{painted}] in {seconds} seconds"));
        self.write_durable(&format!("Finished step [{name}] in {seconds} seconds"))?;
        self.write_durable("")
    }

    pub(crate) fn failed_step(&mut self, name: &str) -> Result<(), BuildError> {
        let painted = self.console.paint(name, Paint::Error);
        self.info(&format!("Step [{painted}] failed"));
        self.write_durable(&format!("Step [{name}] failed"))?;
        self.write_durable("")
    }
}

impl Drop for BuildLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::SharedBuffer;

    fn build_log(root: &Path) -> (BuildLog, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let log = BuildLog::new(Console::new(buffer.clone(), false), root);
        (log, buffer)
    }

    #[test]
    fn open_names_file_after_command_in_unique_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, buffer) = build_log(temp.path());

        let first = log.open("build").expect("open");
        assert!(first.ends_with("build.log"));
        assert!(first.starts_with(temp.path()));
        assert!(first.is_file());
        assert!(
            buffer
                .contents()
                .contains(&format!("Saving full log to {}", first.display()))
        );

        log.close();
        let second = log.open("build").expect("reopen");
        assert_ne!(first.parent(), second.parent());
    }

    #[test]
    fn second_open_closes_first_without_losing_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _buffer) = build_log(temp.path());

        let first = log.open("first").expect("open first");
        log.write_durable("line one").expect("write");
        log.write_durable("line two").expect("write");
        let second = log.open("second").expect("open second");
        log.write_durable("other").expect("write");

        assert_eq!(
            fs::read_to_string(&first).expect("read first"),
            "line one\nline two\n"
        );
        assert_eq!(log.path(), Some(second.as_path()));
        drop(log);
        assert_eq!(fs::read_to_string(&second).expect("read second"), "other\n");
    }

    #[test]
    fn header_is_framed_by_rules() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _buffer) = build_log(temp.path());
        let path = log.open("header").expect("open");

        log.write_durable_header("Entering step [x]").expect("header");
        log.close();

        assert_eq!(
            fs::read_to_string(path).expect("read"),
            "=================\nEntering step [x]\n=================\n"
        );
    }

    #[test]
    fn close_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, buffer) = build_log(temp.path());
        log.open("twice").expect("open");
        log.close();
        log.close();
        assert!(!log.is_open());
        assert!(!buffer.contents().contains("<Warning>"));
    }

    #[test]
    fn durable_writes_without_open_log_are_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, buffer) = build_log(temp.path());
        log.write_durable("nowhere").expect("no-op write");
        assert!(buffer.contents().is_empty());
        assert!(log.path().is_none());
    }

    #[test]
    fn console_markers_are_plain_without_color() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, buffer) = build_log(temp.path());
        log.warning("deprecated flag");
        log.error("archive failed");
        log.success("uploaded");
        log.lines("Version", &["1.2.0", "42"]);

        assert_eq!(
            buffer.contents(),
            "<Warning> deprecated flag\n<Error> archive failed\n✔\u{fe0e} uploaded\n▸ Version\n\n1.2.0\n42\n\n"
        );
    }

    #[test]
    fn step_lines_reach_both_sinks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, buffer) = build_log(temp.path());
        let path = log.open("steps").expect("open");

        log.entering_step("compile").expect("entering");
        log.finished_step("compile", Duration::from_millis(2_340))
            .expect("finished");
        log.skipped_step("package").expect("skipped");
        log.failed_step("notify").expect("failed");
        log.close();

        let console = buffer.contents();
        assert!(console.contains("\nEntering step [compile]\n"));
        assert!(console.contains("Finished step [compile] in 2.3 seconds\n"));
        assert!(console.contains("\nStep [package] was skipped\n"));
        assert!(console.contains("Step [notify] failed\n"));

        let durable = fs::read_to_string(path).expect("read");
        assert_eq!(
            durable,
            "=======================\n\
             Entering step [compile]\n\
             =======================\n\
             Finished step [compile] in 2.3 seconds\n\
             \n\
             ==========================\n\
             Step [package] was skipped\n\
             ==========================\n\
             Step [notify] failed\n\
             \n"
        );
    }
}
