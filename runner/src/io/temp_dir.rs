//! Scratch directories under the system temp dir.
//!
//! Names may contain placeholders expanded at creation time:
//! `$DATE` becomes `yyyyMMdd_HHmmss` (local time) and `$UUID` a random v4 UUID.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use uuid::Uuid;

use crate::error::BuildError;

/// Directory under the system temp dir that holds everything the runner creates.
pub const ROOT_DIR_NAME: &str = "ci-runner";

pub fn default_root() -> PathBuf {
    std::env::temp_dir().join(ROOT_DIR_NAME)
}

/// A created directory; nothing is cleaned up automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryDirectory {
    path: PathBuf,
}

impl TemporaryDirectory {
    /// Create `<temp>/ci-runner/<name>`.
    pub fn new(name: &str) -> Result<Self, BuildError> {
        Self::new_in(&default_root(), name)
    }

    /// Create a directory with a random name.
    pub fn unique() -> Result<Self, BuildError> {
        Self::new("$UUID")
    }

    pub fn new_in(root: &Path, name: &str) -> Result<Self, BuildError> {
        let path = root.join(expand_placeholders(name));
        fs::create_dir_all(&path).map_err(|source| BuildError::CreateDir {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a (not yet created) child entry; placeholders are expanded.
    pub fn child_path(&self, name: &str) -> PathBuf {
        self.path.join(expand_placeholders(name))
    }
}

pub fn expand_placeholders(text: &str) -> String {
    let mut expanded = text.to_string();
    if expanded.contains("$DATE") {
        let date = Local::now().format("%Y%m%d_%H%M%S").to_string();
        expanded = expanded.replace("$DATE", &date);
    }
    if expanded.contains("$UUID") {
        expanded = expanded.replace("$UUID", &Uuid::new_v4().to_string());
    }
    expanded
}
