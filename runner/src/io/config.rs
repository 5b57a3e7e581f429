//! Runner settings read from the `[settings]` table of the build script.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::console::should_colorize;
use crate::io::temp_dir;

/// When console output is colored.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Color when stdout is a terminal, honoring `NO_COLOR` and `COLOR`.
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn enabled(self) -> bool {
        match self {
            ColorMode::Auto => should_colorize(),
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

/// Runner settings (TOML).
///
/// Every field is optional; a script without `[settings]` runs with defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Root under which per-run log directories are created.
    /// Defaults to `<system temp>/ci-runner`.
    pub log_dir: Option<PathBuf>,

    pub color: ColorMode,

    /// Timeout applied to tools that do not set their own. `0` means none.
    pub tool_timeout_secs: u64,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_ref().is_some_and(|dir| dir.as_os_str().is_empty()) {
            return Err(anyhow!("settings.log_dir must not be empty"));
        }
        Ok(())
    }

    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(temp_dir::default_root)
    }

    pub fn default_tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let cfg: RunnerConfig = toml::from_str("").expect("parse");
        assert_eq!(cfg, RunnerConfig::default());
        assert_eq!(cfg.default_tool_timeout(), None);
        assert!(cfg.resolved_log_dir().ends_with("ci-runner"));
    }

    #[test]
    fn parses_all_fields() {
        let cfg: RunnerConfig = toml::from_str(
            "log_dir = \"/var/ci/logs\"\ncolor = \"never\"\ntool_timeout_secs = 90\n",
        )
        .expect("parse");
        assert_eq!(cfg.resolved_log_dir(), PathBuf::from("/var/ci/logs"));
        assert_eq!(cfg.color, ColorMode::Never);
        assert_eq!(cfg.default_tool_timeout(), Some(Duration::from_secs(90)));
        cfg.validate().expect("valid");
    }

    #[test]
    fn rejects_unknown_keys_and_empty_log_dir() {
        assert!(toml::from_str::<RunnerConfig>("colour = \"always\"").is_err());
        let cfg: RunnerConfig = toml::from_str("log_dir = \"\"").expect("parse");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn explicit_color_modes_ignore_environment() {
        assert!(ColorMode::Always.enabled());
        assert!(!ColorMode::Never.enabled());
    }
}
