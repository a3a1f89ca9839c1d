//! File-backed [`MemoryWriteback`] reference implementation.
//!
//! Persists one topic file per project (keyed by a hash of the workspace
//! root, matching the teacher's project-scoped memory directory convention)
//! plus a flat `MEMORY.md` index line per record, in the append/replace
//! style of the teacher's `write_topic`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::collab::MemoryWriteback;
use crate::types::MemoryRecord;

pub struct FileMemoryWriteback {
    dir: PathBuf,
    project_key: String,
}

impl FileMemoryWriteback {
    pub fn new(memory_dir: impl Into<PathBuf>, workspace_root: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(workspace_root.as_bytes());
        let project_key = hex::encode(hasher.finalize())[..16].to_string();
        Self { dir: memory_dir.into(), project_key }
    }

    fn topic_path(&self) -> PathBuf {
        self.dir.join(format!("{}.md", self.project_key))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("MEMORY.md")
    }

    fn render(record: &MemoryRecord) -> String {
        format!(
            "- failures={} maxRetries={} lesson={}\n",
            record.failures, record.max_retries, record.lesson
        )
    }

    fn write_topic(&self, record: &MemoryRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("creating memory directory")?;
        let line = Self::render(record);
        append_or_create(&self.topic_path(), &line)?;
        let index_line = format!("- [{}.md] {}\n", self.project_key, summarize(record));
        append_or_create(&self.index_path(), &index_line)?;
        Ok(())
    }
}

fn append_or_create(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn summarize(record: &MemoryRecord) -> String {
    if record.failures == 0 {
        "pass, no notable lessons".to_string()
    } else {
        format!("{} failure(s): {}", record.failures, record.lesson)
    }
}

#[async_trait]
impl MemoryWriteback for FileMemoryWriteback {
    async fn persist(&self, record: MemoryRecord) -> Result<()> {
        self.write_topic(&record)
    }
}
