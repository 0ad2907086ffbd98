//! Environment lookups.

use std::collections::HashMap;
use std::str::FromStr;

use crate::{Error, Result};

/// Key-value source for configuration overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Trimmed, non-empty value.
    fn text(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl dyn EnvSource + '_ {
    /// Parsed value; a present but unparsable value is a configuration error.
    pub fn number<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        parse_number(self.text(key), key)
    }
}

fn parse_number<T: FromStr>(raw: Option<String>, key: &str) -> Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("{key} must be a number, got '{value}'"))),
    }
}

/// The process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}
