//! Environment assembly for spawned processes.
//!
//! Every spawned process (the main command and each hook) gets the
//! inherited environment of the supervisor, optionally extended with the
//! `KEY=VALUE` lines of an env file. The set is rebuilt for each spawn so
//! edits to the file made by an earlier hook are visible to later ones.

use crate::error::{Error, Result};
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::warn;

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9A-Za-z_]+=.*$").expect("valid env line pattern"))
}

/// Check whether a line is a well-formed `KEY=VALUE` assignment.
pub fn is_valid_line(line: &str) -> bool {
    line_pattern().is_match(line)
}

/// Extract the valid assignments from env file content.
///
/// Lines are trimmed and empty lines are ignored. Malformed lines are
/// logged and skipped; they never abort the remaining lines.
pub fn filter_lines(content: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !is_valid_line(line) {
            warn!(line = %line, "Line is not a KEY=VALUE assignment");
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            vars.push((key.to_string(), value.to_string()));
        }
    }

    vars
}

/// Ordered environment for a child process.
///
/// Later entries win when the same key appears more than once, so file
/// values override inherited ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSet {
    vars: Vec<(OsString, OsString)>,
}

impl EnvironmentSet {
    /// Snapshot the environment of the current process.
    pub fn inherited() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    /// Append an assignment.
    pub fn push(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.vars.push((key.into(), value.into()));
    }

    /// Number of entries, duplicates included.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Effective value of a key (the last assignment wins).
    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Replace the command's environment with this set.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env_clear();
        for (key, value) in &self.vars {
            cmd.env(key, value);
        }
    }
}

/// Build the environment for a spawn from the inherited environment and an
/// optional env file.
///
/// With no file (or an empty path) the inherited environment is returned
/// unchanged. A read failure is returned as [`Error::EnvFile`] without
/// touching the result, so callers can fall back to [`EnvironmentSet::inherited`].
pub fn load_environment(path: Option<&Path>) -> Result<EnvironmentSet> {
    let mut env = EnvironmentSet::inherited();

    let path = match path {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(env),
    };

    let content = std::fs::read_to_string(path).map_err(|source| Error::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;

    for (key, value) in filter_lines(&content) {
        env.push(key, value);
    }

    Ok(env)
}

/// Like [`load_environment`], but a read failure is logged and the
/// inherited environment is used instead.
pub fn load_environment_or_inherited(path: Option<&Path>) -> EnvironmentSet {
    match load_environment(path) {
        Ok(env) => env,
        Err(e) => {
            warn!(env_file = ?path, error = %e, "Falling back to inherited environment");
            EnvironmentSet::inherited()
        }
    }
}
