//! Crontab parser interface and the default line-level parser.
//!
//! The reconciler treats parsed entries as opaque. [`CrontabParser`] only
//! splits a file into environment settings and job lines and checks that
//! each job line has enough fields; interpreting schedules is left to the
//! dispatch side.

use std::fs::File;
use std::io::{self, Read};

use thiserror::Error;

use crate::principal::Principal;

/// Default upper bound on a crontab's size.
pub const DEFAULT_MAX_BYTES: u64 = 256 * 1024;

/// Crontab parse failures.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("crontab exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("crontab is not valid UTF-8")]
    NotUtf8,

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Turns an open crontab into schedule entries.
///
/// Implementations borrow the descriptor for the duration of the call only.
pub trait JobParser: Send + Sync {
    type Entries: Send + Sync + 'static;

    /// `principal` is `None` for system crontabs.
    fn parse(
        &self,
        file: &mut File,
        principal: Option<&Principal>,
        display_name: &str,
    ) -> Result<Self::Entries, ParseError>;
}

/// A `NAME=value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSetting {
    pub name: String,
    pub value: String,
}

/// A job line, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLine {
    /// 1-based line number in the source file.
    pub line: usize,
    pub text: String,
}

/// Entries produced by [`CrontabParser`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrontabEntries {
    pub env: Vec<EnvSetting>,
    pub jobs: Vec<JobLine>,
}

/// Line-level crontab parser.
#[derive(Debug, Clone)]
pub struct CrontabParser {
    max_bytes: u64,
}

impl Default for CrontabParser {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl CrontabParser {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Parse crontab text. System crontabs carry an extra user field.
    pub fn parse_str(&self, text: &str, system: bool) -> Result<CrontabEntries, ParseError> {
        let mut entries = CrontabEntries::default();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(setting) = parse_env(line) {
                entries.env.push(setting);
                continue;
            }

            let fields = line.split_whitespace().count();
            let needed = match (line.starts_with('@'), system) {
                (true, false) => 2,
                (true, true) => 3,
                (false, false) => 6,
                (false, true) => 7,
            };
            if fields < needed {
                return Err(ParseError::Malformed {
                    line: idx + 1,
                    reason: format!("expected at least {needed} fields, found {fields}"),
                });
            }

            entries.jobs.push(JobLine {
                line: idx + 1,
                text: line.to_string(),
            });
        }

        Ok(entries)
    }
}

impl JobParser for CrontabParser {
    type Entries = CrontabEntries;

    fn parse(
        &self,
        file: &mut File,
        principal: Option<&Principal>,
        _display_name: &str,
    ) -> Result<CrontabEntries, ParseError> {
        let mut bytes = Vec::new();
        file.take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut bytes)?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(ParseError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let text = String::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
        self.parse_str(&text, principal.is_none())
    }
}

fn parse_env(line: &str) -> Option<EnvSetting> {
    let (name, value) = line.split_once('=')?;
    let name = name.trim();
    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some(EnvSetting {
        name: name.to_string(),
        value: value.to_string(),
    })
}
