//! Self-check for a `ci` binary that is older than the sources it was built from.
//!
//! Only applies when the executable lives in a Cargo `target/{release,debug}`
//! directory; anywhere else there is no source tree to compare against.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::exit_codes;

const PROFILES: [&str; 2] = ["release", "debug"];
const SKIPPED_DIRS: [&str; 1] = ["target"];

/// Print a notice and exit with [`exit_codes::OUTDATED`] when the running
/// executable is older than any of its sources.
pub fn exit_if_outdated() {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(err) => {
            debug!(error = %err, "cannot locate current executable");
            return;
        }
    };
    match is_outdated(&exe) {
        Ok(true) => {
            println!("Tool is outdated and needs to be rebuilt.");
            std::process::exit(exit_codes::OUTDATED);
        }
        Ok(false) => {}
        Err(err) => warn!(error = %format!("{err:#}"), "staleness check failed"),
    }
}

/// Whether a `.rs` file under a `src` directory of the project is newer than `exe`.
///
/// Returns `false` when `exe` is not inside `<project>/target/{release,debug}/`.
pub fn is_outdated(exe: &Path) -> Result<bool> {
    let Some(project) = project_root(exe) else {
        return Ok(false);
    };
    let built = modified(exe)?;
    let newest = newest_source(&project)?;
    debug!(project = %project.display(), ?newest, "compared sources to executable");
    Ok(newest.is_some_and(|source| source > built))
}

fn project_root(exe: &Path) -> Option<PathBuf> {
    let profile_dir = exe.parent()?;
    let profile = profile_dir.file_name()?.to_str()?;
    if !PROFILES.contains(&profile) {
        return None;
    }
    let target = profile_dir.parent()?;
    if target.file_name()? != "target" {
        return None;
    }
    target.parent().map(Path::to_path_buf)
}

fn newest_source(project: &Path) -> Result<Option<SystemTime>> {
    let mut newest = None;
    let mut pending = vec![(project.to_path_buf(), false)];
    while let Some((dir, in_src)) = pending.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("read directory {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("read entry in {}", dir.display()))?
                .path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if path.is_dir() {
                if name.starts_with('.') || SKIPPED_DIRS.contains(&name) {
                    continue;
                }
                pending.push((path.clone(), in_src || name == "src"));
            } else if in_src && path.extension().is_some_and(|ext| ext == "rs") {
                let time = modified(&path)?;
                newest = newest.max(Some(time));
            }
        }
    }
    Ok(newest)
}

fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("read modification time of {}", path.display()))
}
