//! Running external tools with streamed, filtered output.
//!
//! Every tool invocation funnels through here. Before spawning, the program and
//! its arguments are written to the durable log. Output is then read line by line
//! as the tool produces it; each raw line goes to the durable log, and its
//! filtered form (if not suppressed) to the console.

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::filter::{Filter, FilterChain};
use crate::error::BuildError;
use crate::io::build_log::BuildLog;

const SHELL: &str = "/bin/sh";

/// What happens to the tool's standard error stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StderrMode {
    /// Written into the same pipe as stdout, so lines arrive in the order
    /// the tool wrote them.
    #[default]
    Merge,
    /// Sent to the null device.
    Discard,
}

/// Description of one external process to run.
///
/// Arguments are passed verbatim; no shell is involved unless the invocation
/// is built with [`ToolInvocation::shell`].
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub filters: FilterChain,
    /// Treat a non-zero exit status as success.
    pub allow_failure: bool,
    pub stderr: StderrMode,
    /// Kill the tool and fail once this much time has passed. `None` waits forever.
    pub timeout: Option<Duration>,
    pub workdir: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            filters: FilterChain::default(),
            allow_failure: false,
            stderr: StderrMode::default(),
            timeout: None,
            workdir: None,
        }
    }

    /// Run `command_line` through `/bin/sh -c`.
    pub fn shell(command_line: impl Into<String>) -> Self {
        Self::new(SHELL, ["-c".to_string(), command_line.into()])
    }

    pub fn with_filters(mut self, filters: impl Into<FilterChain>) -> Self {
        self.filters = filters.into();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    pub fn discard_stderr(mut self) -> Self {
        self.stderr = StderrMode::Discard;
        self
    }

    /// Kill the tool once `timeout` has passed.
    ///
    /// On Unix a tool with a timeout runs in its own process group and the
    /// whole group is killed, including anything a shell started.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn run(&self, log: &mut BuildLog) -> Result<ExitStatus, BuildError> {
        run(self, log)
    }

    pub fn run_and_get_output(&self, log: &mut BuildLog) -> Result<String, BuildError> {
        run_and_get_output(self, log)
    }
}

/// Exit status plus the captured output lines, when capture was requested.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub lines: Option<Vec<String>>,
}

/// Run the tool, streaming its output to `log`.
pub fn run(invocation: &ToolInvocation, log: &mut BuildLog) -> Result<ExitStatus, BuildError> {
    execute(invocation, log, false).map(|output| output.status)
}

/// Run the tool and also keep every raw output line in memory.
pub fn run_capturing(
    invocation: &ToolInvocation,
    log: &mut BuildLog,
) -> Result<ToolOutput, BuildError> {
    execute(invocation, log, true)
}

/// Run the tool for the value it prints: captured lines joined with `\n`.
pub fn run_and_get_output(
    invocation: &ToolInvocation,
    log: &mut BuildLog,
) -> Result<String, BuildError> {
    let output = execute(invocation, log, true)?;
    Ok(output.lines.unwrap_or_default().join("\n"))
}

enum StreamEvent {
    Line(String),
    Failed(std::io::Error),
}

enum Received {
    Event(StreamEvent),
    Closed,
    TimedOut,
}

#[instrument(skip_all, fields(program = %invocation.program, capture = capture))]
fn execute(
    invocation: &ToolInvocation,
    log: &mut BuildLog,
    capture: bool,
) -> Result<ToolOutput, BuildError> {
    write_invocation_header(invocation, log)?;

    let own_group = invocation.timeout.is_some();
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args).stdin(Stdio::null());
    let merged = match invocation.stderr {
        StderrMode::Merge => {
            let (reader, writer) = io::pipe().map_err(|source| spawn_failed(invocation, source))?;
            let stderr = writer
                .try_clone()
                .map_err(|source| spawn_failed(invocation, source))?;
            cmd.stdout(writer).stderr(stderr);
            Some(reader)
        }
        StderrMode::Discard => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::null());
            None
        }
    };
    if let Some(dir) = &invocation.workdir {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if own_group {
            cmd.process_group(0);
        }
    }

    debug!("spawning tool process");
    let spawned = cmd.spawn();
    // Our copies of the pipe's write end live in `cmd`; the reader only sees
    // EOF once they are gone.
    drop(cmd);
    let mut child = spawned.map_err(|source| spawn_failed(invocation, source))?;

    let (tx, rx) = mpsc::channel();
    let reader = match merged {
        Some(pipe) => Some(spawn_line_reader(pipe, tx)),
        None => child.stdout.take().map(|stdout| spawn_line_reader(stdout, tx)),
    };

    let deadline = invocation.timeout.map(|timeout| Instant::now() + timeout);
    let mut captured = capture.then(Vec::new);
    if let Err(err) = pump_lines(&rx, deadline, invocation, log, captured.as_mut()) {
        terminate(&mut child, own_group);
        return Err(err);
    }
    if reader.is_some_and(|reader| reader.join().is_err()) {
        warn!("output reader thread panicked");
    }

    let status = wait_for_exit(&mut child, deadline, invocation, own_group)?;
    debug!(exit_code = ?status.code(), "tool finished");
    if !status.success() && !invocation.allow_failure {
        return Err(BuildError::ToolExit {
            program: invocation.program.clone(),
            code: status.code(),
        });
    }
    Ok(ToolOutput {
        status,
        lines: captured,
    })
}

fn write_invocation_header(
    invocation: &ToolInvocation,
    log: &mut BuildLog,
) -> Result<(), BuildError> {
    log.write_durable(&format!("➤ Command {}", invocation.program))?;
    for arg in &invocation.args {
        log.write_durable(&format!("  ➤ {arg}"))?;
    }
    log.write_durable("")
}

/// Deliver lines to the sinks in arrival order until every stream is closed.
fn pump_lines(
    rx: &Receiver<StreamEvent>,
    deadline: Option<Instant>,
    invocation: &ToolInvocation,
    log: &mut BuildLog,
    mut captured: Option<&mut Vec<String>>,
) -> Result<(), BuildError> {
    loop {
        match receive(rx, deadline) {
            Received::Event(StreamEvent::Line(line)) => {
                log.write_durable(&line)?;
                if let Some(lines) = captured.as_deref_mut() {
                    lines.push(line.clone());
                }
                if let Some(shown) = invocation.filters.apply(&line) {
                    log.write_console(&shown);
                }
            }
            Received::Event(StreamEvent::Failed(source)) => {
                return Err(BuildError::ToolOutput {
                    program: invocation.program.clone(),
                    source,
                });
            }
            Received::Closed => return Ok(()),
            Received::TimedOut => return Err(timed_out(invocation)),
        }
    }
}

fn receive(rx: &Receiver<StreamEvent>, deadline: Option<Instant>) -> Received {
    let Some(deadline) = deadline else {
        return match rx.recv() {
            Ok(event) => Received::Event(event),
            Err(_) => Received::Closed,
        };
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(event) => Received::Event(event),
        Err(RecvTimeoutError::Disconnected) => Received::Closed,
        Err(RecvTimeoutError::Timeout) => Received::TimedOut,
    }
}

fn wait_for_exit(
    child: &mut Child,
    deadline: Option<Instant>,
    invocation: &ToolInvocation,
    own_group: bool,
) -> Result<ExitStatus, BuildError> {
    let waited = match deadline {
        None => child.wait().map(Some),
        Some(deadline) => child.wait_timeout(deadline.saturating_duration_since(Instant::now())),
    };
    match waited {
        Ok(Some(status)) => Ok(status),
        Ok(None) => {
            terminate(child, own_group);
            Err(timed_out(invocation))
        }
        Err(source) => Err(BuildError::ToolOutput {
            program: invocation.program.clone(),
            source,
        }),
    }
}

fn timed_out(invocation: &ToolInvocation) -> BuildError {
    let secs = invocation.timeout.map(|t| t.as_secs()).unwrap_or_default();
    warn!(timeout_secs = secs, "tool timed out, killing");
    BuildError::ToolTimeout {
        program: invocation.program.clone(),
        secs,
    }
}

fn spawn_failed(invocation: &ToolInvocation, source: io::Error) -> BuildError {
    warn!(err = %source, "failed to spawn tool");
    BuildError::ToolSpawn {
        program: invocation.program.clone(),
        source,
    }
}

/// Best-effort kill and reap; the tool may already have exited.
///
/// With `own_group` the tool leads its own process group, and the whole group
/// is killed so descendants cannot keep the output pipe open.
fn terminate(child: &mut Child, own_group: bool) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if own_group {
            let group = Pid::from_raw(child.id() as i32);
            if let Err(err) = killpg(group, Signal::SIGKILL) {
                debug!(err = %err, "kill tool process group");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = own_group;
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill tool process");
    }
    let _ = child.wait();
}

fn spawn_line_reader<R: Read + Send + 'static>(
    reader: R,
    tx: Sender<StreamEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(StreamEvent::Line(decode_line(&buf))).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(StreamEvent::Failed(err));
                    break;
                }
            }
        }
    })
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let line = text.strip_suffix('\n').unwrap_or(text.as_ref());
    line.strip_suffix('\r').unwrap_or(line).to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::buffered_log;

    #[test]
    fn streams_raw_lines_to_log_and_filtered_lines_to_console() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, console) = buffered_log(temp.path());
        let path = log.open("tool").expect("open");
        let console_before = console.contents();

        let tool = ToolInvocation::shell("printf 'noise\\nkeep me\\n'")
            .filter(Filter::suppress_containing("noise"));
        let status = tool.run(&mut log).expect("run");
        log.close();

        assert!(status.success());
        assert_eq!(
            console.contents().strip_prefix(&console_before),
            Some("keep me\n")
        );
        assert_eq!(
            fs::read_to_string(path).expect("read log"),
            "➤ Command /bin/sh\n  ➤ -c\n  ➤ printf 'noise\\nkeep me\\n'\n\nnoise\nkeep me\n"
        );
    }

    #[test]
    fn non_zero_exit_fails_after_header_was_logged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _console) = buffered_log(temp.path());
        let path = log.open("tool").expect("open");

        let err = ToolInvocation::shell("echo partial; exit 3")
            .run(&mut log)
            .expect_err("exit 3 must fail");
        log.close();

        assert!(matches!(err, BuildError::ToolExit { code: Some(3), .. }));
        let durable = fs::read_to_string(path).expect("read log");
        assert!(durable.starts_with("➤ Command /bin/sh\n  ➤ -c\n  ➤ echo partial; exit 3\n"));
        assert!(durable.ends_with("partial\n"));
    }

    #[test]
    fn allow_failure_returns_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _console) = buffered_log(temp.path());

        let status = ToolInvocation::shell("exit 4")
            .allow_failure()
            .run(&mut log)
            .expect("allowed failure");
        assert_eq!(status.code(), Some(4));
    }

    #[test]
    fn missing_executable_is_a_spawn_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _console) = buffered_log(temp.path());

        let err = ToolInvocation::new("/nonexistent/ci-tool", ["--version"])
            .run(&mut log)
            .expect_err("spawn must fail");
        assert!(matches!(err, BuildError::ToolSpawn { .. }));
        assert!(err.to_string().starts_with("Failed to execute tool '/nonexistent/ci-tool'"));
    }

    #[test]
    fn merged_stderr_keeps_the_order_lines_were_written() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _console) = buffered_log(temp.path());
        let expected: Vec<String> = (1..=10)
            .flat_map(|i| [format!("out{i}"), format!("err{i}")])
            .collect();

        let tool = ToolInvocation::shell(
            "for i in 1 2 3 4 5 6 7 8 9 10; do echo out$i; echo err$i 1>&2; done",
        );
        for _ in 0..20 {
            let output = tool.run_and_get_output(&mut log).expect("run");
            let lines: Vec<&str> = output.lines().collect();
            assert_eq!(lines, expected);
        }
    }

    #[test]
    fn streams_lines_before_tool_exits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, console) = buffered_log(temp.path());

        let watcher = {
            let console = console.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(700));
                console.contents()
            })
        };
        ToolInvocation::shell("echo early; sleep 2; echo late")
            .run(&mut log)
            .expect("run");
        let seen_while_running = watcher.join().expect("watcher");

        assert_eq!(seen_while_running, "early\n");
        assert_eq!(console.contents(), "early\nlate\n");
    }

    #[test]
    fn stderr_can_be_discarded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, console) = buffered_log(temp.path());

        let output = ToolInvocation::shell("echo out; echo err 1>&2")
            .discard_stderr()
            .run_and_get_output(&mut log)
            .expect("run");
        assert_eq!(output, "out");
        assert!(!console.contents().contains("err"));
    }

    #[test]
    fn output_joins_lines_without_trailing_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _console) = buffered_log(temp.path());

        let output = ToolInvocation::shell("printf 'a1b2c3\\r\\nlast'")
            .run_and_get_output(&mut log)
            .expect("run");
        assert_eq!(output, "a1b2c3\nlast");
    }

    #[test]
    fn capturing_keeps_raw_lines_even_when_suppressed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, console) = buffered_log(temp.path());

        let tool =
            ToolInvocation::shell("echo fatal: no tag").filter(Filter::suppress_matching("^fatal:"));
        let output = run_capturing(&tool, &mut log).expect("run");
        assert_eq!(output.lines, Some(vec!["fatal: no tag".to_string()]));
        assert!(!console.contents().contains("fatal"));
    }

    #[test]
    fn timeout_kills_tool_and_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _console) = buffered_log(temp.path());

        let started = Instant::now();
        let err = ToolInvocation::new("sleep", ["5"])
            .with_timeout(Duration::from_millis(200))
            .run(&mut log)
            .expect_err("timeout");
        assert!(matches!(err, BuildError::ToolTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_processes_started_by_the_tool() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _console) = buffered_log(temp.path());
        let path = log.open("timeout").expect("open");

        let err = ToolInvocation::shell("sleep 30 & echo $!; wait")
            .with_timeout(Duration::from_millis(300))
            .run(&mut log)
            .expect_err("timeout");
        log.close();
        assert!(matches!(err, BuildError::ToolTimeout { .. }));

        let durable = fs::read_to_string(path).expect("read log");
        let pid = durable
            .lines()
            .rev()
            .find(|line| !line.is_empty())
            .expect("pid line")
            .to_string();
        let stat = format!("/proc/{pid}/stat");
        let gone = (0..40).any(|_| {
            let alive = fs::read_to_string(&stat).is_ok_and(|stat| !stat.contains(") Z "));
            if alive {
                thread::sleep(Duration::from_millis(50));
            }
            !alive
        });
        assert!(gone, "background sleep {pid} survived the timeout");
    }

    #[test]
    fn runs_in_requested_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (mut log, _console) = buffered_log(temp.path());
        let workdir = temp.path().join("work");
        fs::create_dir_all(&workdir).expect("mkdir");

        let output = ToolInvocation::new("pwd", Vec::<String>::new())
            .current_dir(&workdir)
            .run_and_get_output(&mut log)
            .expect("pwd");
        assert_eq!(
            fs::canonicalize(output).expect("canonical output"),
            fs::canonicalize(&workdir).expect("canonical workdir")
        );
    }
}
