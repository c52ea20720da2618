//! Flat command arguments as handed over by the host.
//!
//! Everything arrives as strings; typed request structs parse what they need
//! once and report problems as [`ConnectorError::InvalidRequest`].

use crate::traits::{ConnectorError, ConnectorResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Key-value arguments of one command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawArgs(BTreeMap<String, String>);

impl RawArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns a non-empty value. Empty strings count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn required(&self, key: &str) -> ConnectorResult<&str> {
        self.get(key).ok_or_else(|| {
            ConnectorError::InvalidRequest(format!("Missing required argument '{}'", key))
        })
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Parses an optional numeric or other `FromStr` argument.
    pub fn parse<T: FromStr>(&self, key: &str) -> ConnectorResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                ConnectorError::InvalidRequest(format!(
                    "Argument '{}' has an invalid value: {}",
                    key, raw
                ))
            }),
        }
    }

    pub fn usize_or(&self, key: &str, default: usize) -> ConnectorResult<usize> {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Accepts `true`/`false`, `yes`/`no` and `1`/`0`, case-insensitively.
    pub fn bool_or(&self, key: &str, default: bool) -> ConnectorResult<bool> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(ConnectorError::InvalidRequest(format!(
                    "Argument '{}' must be a boolean, got: {}",
                    key, v
                ))),
            },
        }
    }

    /// Splits a comma-separated argument into trimmed, non-empty items.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
