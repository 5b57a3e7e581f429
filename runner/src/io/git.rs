//! Git queries used by build commands (commit hash, release tag).
//!
//! Both queries run `git` as an ordinary tool so they show up in the build log
//! like any other invocation.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::core::filter::Filter;
use crate::error::BuildError;
use crate::io::build_log::BuildLog;
use crate::io::process::ToolInvocation;

/// Git queries against one working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Abbreviated hash of `HEAD`.
    #[instrument(skip_all)]
    pub fn commit_hash(&self, log: &mut BuildLog) -> Result<String, BuildError> {
        let hash = self
            .git(["rev-parse", "--short", "HEAD"])
            .run_and_get_output(log)?;
        debug!(hash = %hash, "commit hash");
        Ok(hash.trim().to_string())
    }

    /// Tag pointing exactly at `HEAD`, if there is one.
    #[instrument(skip_all)]
    pub fn commit_tag(&self, log: &mut BuildLog) -> Result<Option<String>, BuildError> {
        let output = self
            .git(["describe", "--tags", "--exact-match"])
            .filter(Filter::suppress_matching("^fatal:"))
            .allow_failure()
            .run_and_get_output(log)?;
        let tag = output.trim();
        if tag.is_empty() || tag.starts_with("fatal:") {
            debug!("no tag at HEAD");
            return Ok(None);
        }
        Ok(Some(tag.to_string()))
    }

    fn git<const N: usize>(&self, args: [&str; N]) -> ToolInvocation {
        ToolInvocation::new("git", args).current_dir(&self.workdir)
    }
}
