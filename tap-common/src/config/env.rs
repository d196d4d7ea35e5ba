//! Typed reads of `TAP_*` environment variables.
//!
//! Every setting the suite reads comes through [`EnvParser`]. Problems are
//! collected instead of returned one at a time so a misconfigured run
//! reports everything it needs fixed in one go. Empty and whitespace-only
//! values count as unset.

use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use super::Secret;
use super::source::Sourced;

/// Prefix of every variable the suite reads.
pub const ENV_PREFIX: &str = "TAP_";

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("{var} is required but not set")]
    Missing { var: String },

    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("{var}={value} is outside {min}..={max}")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("{var} points at {path}, which does not exist")]
    PathNotFound { var: String, path: String },
}

/// Reads prefixed variables and accumulates [`EnvError`]s.
pub struct EnvParser {
    prefix: String,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    pub fn new() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }

    /// Parser for another prefix; tests use this to stay out of `TAP_*`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            errors: Vec::new(),
        }
    }

    pub fn var_name(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Hand back everything recorded so far, leaving the parser clean.
    pub fn finish(&mut self) -> Result<(), Vec<EnvError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    /// Look `name` up; `None` when unset or blank.
    fn lookup(&self, name: &str) -> (String, Option<String>) {
        let var = self.var_name(name);
        let value = env::var(&var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        (var, value)
    }

    fn invalid(&mut self, var: &str, expected: &'static str, value: impl Into<String>) {
        self.errors.push(EnvError::Invalid {
            var: var.to_string(),
            expected,
            value: value.into(),
        });
    }

    pub fn string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match self.lookup(name) {
            (var, Some(value)) => Sourced::from_env(value, var),
            (_, None) => Sourced::default_value(default.to_string()),
        }
    }

    /// A value with no sensible default. Records [`EnvError::Missing`] and
    /// yields an empty string when absent.
    pub fn required(&mut self, name: &str) -> Sourced<String> {
        match self.lookup(name) {
            (var, Some(value)) => Sourced::from_env(value, var),
            (var, None) => {
                self.errors.push(EnvError::Missing { var });
                Sourced::default_value(String::new())
            }
        }
    }

    pub fn optional(&mut self, name: &str) -> Sourced<Option<String>> {
        match self.lookup(name) {
            (var, Some(value)) => Sourced::from_env(Some(value), var),
            (_, None) => Sourced::default_value(None),
        }
    }

    /// A credential; wrapped immediately so it never reaches a log line.
    pub fn secret(&mut self, name: &str) -> Sourced<Option<Secret>> {
        self.optional(name).map(|value| value.map(Secret::new))
    }

    /// An `http(s)` base URL without trailing slashes. With no default the
    /// variable is required.
    pub fn url(&mut self, name: &str, default: Option<&str>) -> Sourced<String> {
        let raw = match default {
            Some(default) => self.string(name, default),
            None => self.required(name),
        };
        if !raw.value.is_empty()
            && !(raw.value.starts_with("https://") || raw.value.starts_with("http://"))
        {
            let var = self.var_name(name);
            self.invalid(&var, "http(s) URL", raw.value.clone());
        }
        raw.map(|url| url.trim_end_matches('/').to_string())
    }

    /// `1/true/yes/on` or `0/false/no/off`, case-insensitive.
    pub fn flag(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let (var, Some(value)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Sourced::from_env(true, var),
            "0" | "false" | "no" | "off" => Sourced::from_env(false, var),
            _ => {
                self.invalid(&var, "boolean", value);
                Sourced::default_value(default)
            }
        }
    }

    /// A number inside `bounds`. Falls back to `default` on any problem.
    pub fn range<T>(&mut self, name: &str, default: T, bounds: RangeInclusive<T>) -> Sourced<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let (var, Some(value)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        match value.parse::<T>() {
            Ok(n) if bounds.contains(&n) => Sourced::from_env(n, var),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n.to_string(),
                    min: bounds.start().to_string(),
                    max: bounds.end().to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.invalid(&var, "number", value);
                Sourced::default_value(default)
            }
        }
    }

    /// Whole seconds inside `bounds`, as a [`Duration`].
    pub fn seconds(&mut self, name: &str, default: u64, bounds: RangeInclusive<u64>) -> Sourced<Duration> {
        self.range(name, default, bounds).map(Duration::from_secs)
    }

    /// A filesystem path with `~/` expanded.
    pub fn path(&mut self, name: &str, must_exist: bool) -> Sourced<Option<PathBuf>> {
        let (var, Some(value)) = self.lookup(name) else {
            return Sourced::default_value(None);
        };
        let path = match (value.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&value),
        };
        if must_exist && !path.exists() {
            self.errors.push(EnvError::PathNotFound {
                var: var.clone(),
                path: path.display().to_string(),
            });
        }
        Sourced::from_env(Some(path), var)
    }

    /// A `tracing` level name, lowercased.
    pub fn log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let (var, Some(value)) = self.lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let level = value.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Sourced::from_env(level, var)
        } else {
            self.invalid(&var, "log level", value);
            Sourced::default_value(default.to_string())
        }
    }

    /// Comma-separated names; blanks are dropped.
    pub fn list(&mut self, name: &str) -> Sourced<Vec<String>> {
        match self.lookup(name) {
            (var, Some(value)) => Sourced::from_env(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
                var,
            ),
            (_, None) => Sourced::default_value(Vec::new()),
        }
    }
}
