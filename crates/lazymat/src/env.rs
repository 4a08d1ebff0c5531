//! Environment-driven defaults for opening sessions.

use std::env;
use std::path::PathBuf;

pub const BACKEND_VAR: &str = "LAZYMAT_BACKEND";
pub const DUMP_PROGRAMS_VAR: &str = "LAZYMAT_DUMP_PROGRAMS";
pub const LOG_VAR: &str = "LAZYMAT_LOG";

pub const DEFAULT_BACKEND: &str = "cpu";

fn non_empty_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

pub(crate) fn backend_name() -> String {
    non_empty_var(BACKEND_VAR).unwrap_or_else(|| DEFAULT_BACKEND.to_string())
}

pub(crate) fn dump_programs_dir() -> Option<PathBuf> {
    non_empty_var(DUMP_PROGRAMS_VAR).map(PathBuf::from)
}

pub(crate) fn log_filter() -> Option<String> {
    non_empty_var(LOG_VAR)
}

/// Settings used when a session opens its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    backend: String,
    dump_programs: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            dump_programs: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `LAZYMAT_BACKEND` and `LAZYMAT_DUMP_PROGRAMS`.
    pub fn from_env() -> Self {
        Self {
            backend: backend_name(),
            dump_programs: dump_programs_dir(),
        }
    }

    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.backend = name.into();
        self
    }

    /// Writes every lowered program as JSON into `dir` before it runs.
    pub fn dump_programs(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_programs = Some(dir.into());
        self
    }

    pub fn backend_name(&self) -> &str {
        &self.backend
    }

    pub fn dump_dir(&self) -> Option<&PathBuf> {
        self.dump_programs.as_ref()
    }
}
