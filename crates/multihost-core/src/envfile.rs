//! Reader for `KEY=VALUE` environment files.
//!
//! The format is the one overlay agents write for their consumers: one
//! assignment per line, split on the first `=`. Anything fancier (quoting,
//! `export`, comments) is not recognised.

use std::collections::HashMap;

use crate::error::{CoreError, Result};

/// Parsed contents of an environment file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: HashMap<String, String>,
}

impl EnvFile {
    /// Parses raw bytes, as captured from a process's output.
    ///
    /// Blank lines are skipped. A non-blank line without `=` fails the whole
    /// parse. A later assignment to the same key replaces the earlier one.
    ///
    /// # Examples
    ///
    /// ```
    /// use multihost_core::envfile::EnvFile;
    ///
    /// let env = EnvFile::parse(b"FLANNEL_MTU=1450\nFLANNEL_IPMASQ=false\n").unwrap();
    /// assert_eq!(env.get("FLANNEL_MTU"), Some("1450"));
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(bytes);
        let mut entries = HashMap::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| CoreError::MalformedLine {
                line_no: idx + 1,
                line: line.to_string(),
            })?;

            entries.insert(key.to_string(), value.to_string());
        }

        Ok(Self { entries })
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, or [`CoreError::MissingKey`].
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| CoreError::MissingKey(key.to_string()))
    }

    /// Parses the value for `key` with [`std::str::FromStr`].
    pub fn require_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<T> {
        let raw = self.require(key)?;
        raw.trim()
            .parse()
            .map_err(|_| CoreError::invalid_value(key, raw))
    }

    /// Reads `key` as a boolean. Only `true` and `false` are accepted,
    /// ignoring case.
    pub fn require_bool(&self, key: &str) -> Result<bool> {
        let raw = self.require(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(CoreError::invalid_value(key, raw)),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the file had no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
