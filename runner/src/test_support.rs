//! Test-only helpers for capturing console output and building scratch workspaces.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::build_log::BuildLog;
use crate::io::console::Console;

/// Cloneable in-memory writer; every clone appends to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        match self.0.lock() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .0
            .lock()
            .map_err(|_| io::Error::other("shared buffer poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A build log with an uncolored, captured console; durable logs go under `root`.
pub fn buffered_log(root: &Path) -> (BuildLog, SharedBuffer) {
    let buffer = SharedBuffer::default();
    let log = BuildLog::new(Console::new(buffer.clone(), false), root);
    (log, buffer)
}

/// Temporary directory holding scripts and build logs for one test.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp workspace")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_root(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    /// Write `contents` to `ci.toml` in the workspace and return its path.
    pub fn write_script(&self, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join("ci.toml");
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// The only `.log` file under [`Self::log_root`] whose name is `<command>.log`.
    pub fn read_command_log(&self, command: &str) -> Result<String> {
        let file_name = format!("{command}.log");
        for entry in fs::read_dir(self.log_root()).context("read log root")? {
            let candidate = entry.context("read log dir entry")?.path().join(&file_name);
            if candidate.is_file() {
                return fs::read_to_string(&candidate)
                    .with_context(|| format!("read {}", candidate.display()));
            }
        }
        anyhow::bail!("no log found for command '{command}'")
    }
}
