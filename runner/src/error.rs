//! Classified build failures.
//!
//! Every [`BuildError`] is an expected failure carrying a human-readable message:
//! the step executor reports it verbatim and latches the command as failed. Any
//! other error that reaches a step boundary is treated as unexpected.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Free-form failure raised by a script or tool adapter.
    #[error("{0}")]
    Message(String),

    #[error("Failed to execute tool '{program}'")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tool '{program}' {}", describe_exit(.code))]
    ToolExit { program: String, code: Option<i32> },

    #[error("Tool '{program}' timed out after {secs} seconds")]
    ToolTimeout { program: String, secs: u64 },

    #[error("Failed to read output of tool '{program}'")]
    ToolOutput {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{}'", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write build log to '{}'", .path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write into build log")]
    LogWrite(#[source] std::io::Error),

    #[error("Required environment variable {0} was not set.")]
    MissingEnv(String),
}

impl BuildError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}."),
        None => "was terminated by a signal.".to_string(),
    }
}
