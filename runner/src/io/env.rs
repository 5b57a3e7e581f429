//! Environment variables as seen by build commands.
//!
//! Commands read the environment through an [`Env`] snapshot taken once at
//! startup, so lookups are consistent for the whole run and tests can supply
//! their own variables.

use std::collections::BTreeMap;

use crate::error::BuildError;
use crate::io::build_log::BuildLog;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    /// Snapshot the current process environment. Non-UTF-8 entries are skipped.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Value of `key`; unset and empty are both errors.
    pub fn required(&self, key: &str) -> Result<&str, BuildError> {
        self.optional(key)
            .ok_or_else(|| BuildError::MissingEnv(key.to_string()))
    }

    /// Value of `key`, treating an empty value as unset.
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn optional_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.optional(key).unwrap_or(default)
    }

    /// All variables, sorted by name.
    pub fn all(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Print every variable as `KEY: value` under an "Environment" title.
    pub fn write_to_log(&self, log: &mut BuildLog) {
        let lines: Vec<String> = self.all().map(|(k, v)| format!("{k}: {v}")).collect();
        log.lines("Environment", &lines);
    }
}
