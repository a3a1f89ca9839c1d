//! File-backed [`Logger`] reference implementation.
//!
//! Writes `<phase>-input.json` / `<phase>-output.json` artifacts under
//! `<data_dir>/jobs/<job_id>/artifacts/` and appends every event to a
//! single JSONL log, serialized internally (spec.md §5 "Logger: append-only
//! and internally serialized").

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::collab::Logger;

pub struct FileLogger {
    job_dir: PathBuf,
    events_path: PathBuf,
    write_lock: Mutex<()>,
    artifact_seq: AtomicUsize,
}

impl FileLogger {
    pub fn new(data_dir: impl Into<PathBuf>, job_id: &str) -> Self {
        let job_dir = data_dir.into().join("jobs").join(job_id);
        let events_path = job_dir.join("events.jsonl");
        Self { job_dir, events_path, write_lock: Mutex::new(()), artifact_seq: AtomicUsize::new(0) }
    }

    fn artifacts_dir(&self) -> PathBuf {
        self.job_dir.join("artifacts")
    }
}

#[async_trait]
impl Logger for FileLogger {
    async fn log(&self, event_type: &str, data: serde_json::Value) {
        let _guard = self.write_lock.lock().await;
        let record = serde_json::json!({
            "ts": Utc::now().to_rfc3339(),
            "type": event_type,
            "data": data,
        });
        if std::fs::create_dir_all(&self.job_dir).is_err() {
            return;
        }
        use std::io::Write;
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&self.events_path) {
            let _ = writeln!(file, "{record}");
        }
    }

    async fn write_phase_artifact(&self, phase: &str, kind: &str, payload: serde_json::Value) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let seq = self.artifact_seq.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(self.artifacts_dir()).context("creating artifacts directory")?;
        let file_name = format!("{phase}-{kind}-{seq}.json");
        let path = self.artifacts_dir().join(&file_name);
        let rendered = serde_json::to_string_pretty(&payload)?;
        std::fs::write(&path, rendered).with_context(|| format!("writing {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }
}
