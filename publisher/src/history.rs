use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    /// Number of most recent runs to keep.
    pub runs: usize,
    /// Number of most recent runs that keep their artifacts.
    pub artifacts: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            runs: 4,
            artifacts: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Build,
    Auth,
    Push,
    Interrupted,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed { kind: FailureKind },
    TimedOut,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => f.write_str("succeeded"),
            RunStatus::Failed { kind } => {
                let kind = match kind {
                    FailureKind::Build => "build",
                    FailureKind::Auth => "auth",
                    FailureKind::Push => "push",
                    FailureKind::Interrupted => "interrupted",
                    FailureKind::Config => "config",
                };
                write!(f, "failed ({kind})")
            }
            RunStatus::TimedOut => f.write_str("timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub image_id: String,
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub started: OffsetDateTime,
    pub duration_secs: u64,
    pub status: RunStatus,
    pub timestamp_tag: Option<String>,
    /// Tags that reached the registry, in push order.
    pub pushed: Vec<String>,
    pub commit: Option<String>,
    pub publisher_version: String,
    pub user: String,
    pub artifacts: Option<Artifacts>,
}

/// Drops the oldest records beyond `retention.runs` and strips artifacts from all but the newest
/// `retention.artifacts` records. Records are ordered oldest first.
pub fn apply_retention(records: &mut Vec<RunRecord>, retention: Retention) {
    let excess = records.len().saturating_sub(retention.runs);
    records.drain(..excess);

    let keep_artifacts_from = records.len().saturating_sub(retention.artifacts);
    for record in &mut records[..keep_artifacts_from] {
        record.artifacts = None;
    }
}

/// Run history of a single pipeline, stored as a JSON array.
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the records oldest first. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<RunRecord>> {
        match fs::read(&self.path) {
            Ok(contents) => Ok(serde_json::from_slice(&contents)
                .map_err(|error| format!("unable to parse history {:?}: {error}", self.path))?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => {
                Err(format!("unable to read history {:?}: {error}", self.path).into())
            }
        }
    }

    pub fn append(&self, record: RunRecord, retention: Retention) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        apply_retention(&mut records, retention);
        self.store(&records)
    }

    fn store(&self, records: &[RunRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write to a sibling and rename so that readers never observe a partial file.
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(records)?)?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(
            "wrote {count} record(s) to {path:?}",
            count = records.len(),
            path = self.path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::temp_path::tmp_path;

    fn record(minute: u8, artifacts: bool) -> RunRecord {
        let started = datetime!(2024-03-05 09:00 UTC)
            .replace_minute(minute)
            .unwrap();
        RunRecord {
            started,
            duration_secs: 42,
            status: RunStatus::Succeeded,
            timestamp_tag: Some(format!("2024-03-05T09{minute:02}")),
            pushed: vec!["1.0".to_owned(), format!("2024-03-05T09{minute:02}")],
            commit: None,
            publisher_version: "0.1.0".to_owned(),
            user: "jenkins".to_owned(),
            artifacts: artifacts.then(|| Artifacts {
                image_id: format!("sha256:{minute:064}"),
                digest: None,
            }),
        }
    }

    #[test]
    fn retention_keeps_last_runs_and_artifacts() {
        let mut records: Vec<RunRecord> = (0..6).map(|minute| record(minute, true)).collect();
        apply_retention(&mut records, Retention::default());

        assert_eq!(records.len(), 4);
        let minutes: Vec<u8> = records.iter().map(|r| r.started.minute()).collect();
        assert_eq!(minutes, [2, 3, 4, 5]);
        let with_artifacts: Vec<bool> = records.iter().map(|r| r.artifacts.is_some()).collect();
        assert_eq!(with_artifacts, [false, false, true, true]);
    }

    #[test]
    fn retention_with_few_records_is_a_no_op() {
        let mut records = vec![record(0, true)];
        apply_retention(&mut records, Retention::default());
        assert_eq!(records, vec![record(0, true)]);
    }

    #[test]
    fn append_persists_and_prunes() {
        let history = History::new(tmp_path("release-publisher-history-", ".json"));
        assert!(history.load().unwrap().is_empty());

        for minute in 0..5 {
            history.append(record(minute, true), Retention::default()).unwrap();
        }

        let records = history.load().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].started.minute(), 1);
        assert!(records[1].artifacts.is_none());
        assert!(records[3].artifacts.is_some());

        std::fs::remove_file(history.path()).unwrap();
    }

    #[test]
    fn status_serialization() {
        let json = serde_json::to_string(&RunStatus::Failed {
            kind: FailureKind::Push,
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"failed","kind":"push"}"#);
        assert_eq!(
            serde_json::from_str::<RunStatus>(r#"{"outcome":"timed_out"}"#).unwrap(),
            RunStatus::TimedOut
        );
    }
}
