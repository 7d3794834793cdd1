//! Key/value configuration source.
//!
//! Format: one `name = value` entry per line. Lines whose first non-blank
//! character is `#` or `;` are comments. Keys are case-insensitive.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{CepstraError, Result};

/// Parsed `name = value` entries, keyed by upper-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
    entries: BTreeMap<String, String>,
}

impl ConfigMap {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let map = Self::parse(&text)?;
        debug!(path = %path.display(), entries = map.len(), "configuration loaded");
        Ok(map)
    }

    /// Parse configuration text. Fails on duplicate keys or when no entry is found.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                warn!(line = line_no + 1, content = line, "skipping malformed configuration line");
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                warn!(line = line_no + 1, "skipping configuration line without a name");
                continue;
            }
            let key = name.to_ascii_uppercase();
            let value = strip_quotes(value.trim()).to_string();
            if entries.insert(key.clone(), value).is_some() {
                return Err(CepstraError::DuplicateConfigKey(key));
            }
        }

        if entries.is_empty() {
            return Err(CepstraError::EmptyConfig);
        }
        Ok(Self { entries })
    }

    /// Build a map from in-memory pairs, mostly useful for tests and presets.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v.to_string()))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| CepstraError::MissingConfigKey(key.to_ascii_uppercase()))
    }

    /// Boolean lookup accepting `yes/no`, `true/false` and `1/0`.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        let Some(value) = self.get_str(key) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(Some(true)),
            "no" | "false" | "0" => Ok(Some(false)),
            _ => Err(CepstraError::invalid(key, value)),
        }
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get_str(key) {
            None => Ok(None),
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|_| CepstraError::invalid(key, value)),
        }
    }

    pub fn require_parsed<T: FromStr>(&self, key: &str) -> Result<T> {
        self.get_parsed(key)?
            .ok_or_else(|| CepstraError::MissingConfigKey(key.to_ascii_uppercase()))
    }
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
