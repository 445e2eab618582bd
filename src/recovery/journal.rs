//! Append-only failure journal
//!
//! One JSON object per line. The journal is for people diagnosing stuck
//! sweeps; nothing reads it back to make decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

use crate::error::{Error, Result};
use crate::sweep::Step;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub step: Step,
    pub code: u16,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl FailureRecord {
    pub fn new(step: Step, error: impl Display, payload: Option<&[u8]>) -> Self {
        Self {
            timestamp: Utc::now(),
            step,
            code: step.code(),
            error: error.to_string(),
            payload: payload.map(|p| String::from_utf8_lossy(p).into_owned()),
        }
    }
}

pub struct ErrorJournal {
    path: PathBuf,
    // Serialises appends from concurrent sweep tasks
    write_lock: Mutex<()>,
}

impl ErrorJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &FailureRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append a record, logging instead of failing
    pub async fn record(&self, step: Step, error: impl Display, payload: Option<&[u8]>) {
        let record = FailureRecord::new(step, error, payload);
        if let Err(e) = self.append(&record).await {
            error!(path = %self.path.display(), "Failed to write error journal: {}", e);
        }
    }

    /// Read every record back
    pub async fn entries(&self) -> Result<Vec<FailureRecord>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        data.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str(l)
                    .map_err(|e| Error::Storage(format!("corrupt journal line: {}", e)))
            })
            .collect()
    }
}
