//! I/O adapters for command execution.

pub mod build_log;
pub mod config;
pub mod console;
pub mod env;
pub mod git;
pub mod process;
pub mod temp_dir;
