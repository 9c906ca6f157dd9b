//! Meta file parsing for isolate
//!
//! Isolate writes `key:value` lines describing how the program ended.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::isolate::IsolateError;
use crate::types::{LimitExceeded, Termination};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("meta file parse error at line {line_number}: {message} (line: {line:?})")]
pub struct MetaParseError {
    pub line_number: usize,
    pub line: String,
    pub message: String,
}

/// Parsed meta file from Isolate
#[derive(Debug, Clone, Default)]
pub struct MetaFile {
    entries: HashMap<String, String>,
}

impl MetaFile {
    /// Parse meta file content, rejecting malformed lines
    ///
    /// Values may contain colons; only the first one separates the key.
    pub fn parse(content: &str) -> Result<Self, MetaParseError> {
        let mut entries = HashMap::new();

        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let error = |message: &str| MetaParseError {
                line_number: idx + 1,
                line: line.to_owned(),
                message: message.to_owned(),
            };
            let (key, value) = trimmed
                .split_once(':')
                .ok_or_else(|| error("missing colon separator"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(error("empty key before colon"));
            }
            entries.insert(key.to_owned(), value.trim().to_owned());
        }

        Ok(Self { entries })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IsolateError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::parse(&content).map_err(|e| IsolateError::CommandFailed(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.get_parsed("exitcode")
    }

    pub fn signal(&self) -> Option<i32> {
        self.get_parsed("exitsig")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("message")
    }

    pub fn wall_time(&self) -> Duration {
        self.get_parsed::<f64>("time-wall")
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_default()
    }

    /// Map isolate's status code to how the program ended
    ///
    /// `XX` means isolate itself failed and is reported as an error.
    pub fn termination(&self) -> Result<Termination, IsolateError> {
        match self.get("status") {
            None => Ok(Termination::Exited(self.exit_code().unwrap_or(0))),
            Some("RE") => Ok(Termination::Exited(self.exit_code().unwrap_or(1))),
            Some("TO") => Ok(Termination::TimedOut),
            Some("SG") => Ok(Termination::Signaled(self.signal().unwrap_or(0))),
            Some("XX") => Err(IsolateError::Internal(
                self.message().unwrap_or("no message").to_owned(),
            )),
            Some(other) => Err(IsolateError::Internal(format!("unknown status '{other}'"))),
        }
    }

    /// Determine which limit was exceeded based on message and status
    pub fn limit_exceeded(&self) -> LimitExceeded {
        let from_message = LimitExceeded::from_message(self.message());
        if from_message.is_exceeded() {
            return from_message;
        }
        if self.get("status") == Some("TO") {
            return LimitExceeded::Time;
        }
        LimitExceeded::NotExceeded
    }
}
