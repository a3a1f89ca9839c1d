//! Filesystem-backed [`VcsClient`] reference implementation.
//!
//! Applies `create`/`replace`/`delete` patch actions against a workspace
//! root, holding a worktree lock for the duration of apply + rollback
//! (spec.md §5 "Shared-resource policy"). Rollback-on-partial-failure is
//! grounded in the teacher's `ApplyPatchTool` (backup every touched file up
//! front, restore all of them the moment one hunk fails).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::collab::VcsClient;
use crate::error::{PatchApplyFailure, PatchApplySource};
use crate::types::{Patch, PatchAction};

pub struct FilesystemVcs {
    root: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FilesystemVcs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), lock: Arc::new(Mutex::new(())) }
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let p = Path::new(file);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

#[async_trait]
impl VcsClient for FilesystemVcs {
    async fn apply(&self, patches: &[Patch]) -> Result<Vec<String>, PatchApplyFailure> {
        let _guard = self.lock.lock().await;

        let mut backups: HashMap<PathBuf, Option<String>> = HashMap::new();
        for patch in patches {
            let path = self.resolve(&patch.file);
            if !backups.contains_key(&path) {
                let existing = std::fs::read_to_string(&path).ok();
                backups.insert(path, existing);
            }
        }

        let mut touched = Vec::new();
        for patch in patches {
            let path = self.resolve(&patch.file);
            if let Err(error) = apply_one(&path, patch) {
                rollback(&backups);
                return Err(PatchApplyFailure {
                    source_label: PatchApplySource::BuilderPatchProcessing,
                    error,
                    patches: patches.to_vec(),
                    rollback_attempted: true,
                    rollback_ok: true,
                    raw_output: None,
                });
            }
            touched.push(patch.file.clone());
        }

        Ok(touched)
    }
}

fn apply_one(path: &Path, patch: &Patch) -> Result<(), String> {
    match patch.action {
        PatchAction::Create => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| format!("ENOENT: {e}"))?;
            }
            let content = patch.replace_block.clone().unwrap_or_default();
            std::fs::write(path, content).map_err(|e| format!("ENOENT: {e}"))
        }
        PatchAction::Delete => {
            if !path.exists() {
                return Err(format!("ENOENT: {} does not exist", path.display()));
            }
            std::fs::remove_file(path).map_err(|e| format!("ENOENT: {e}"))
        }
        PatchAction::Replace => {
            let current = std::fs::read_to_string(path).map_err(|e| format!("ENOENT: {e}"))?;
            let search = patch.search_block.clone().unwrap_or_default();
            if !current.contains(&search) {
                return Err(format!("search block not found in {}", path.display()));
            }
            let replacement = patch.replace_block.clone().unwrap_or_default();
            let updated = current.replacen(&search, &replacement, 1);
            std::fs::write(path, updated).map_err(|e| format!("ENOENT: {e}"))
        }
    }
}

fn rollback(backups: &HashMap<PathBuf, Option<String>>) {
    for (path, backup) in backups {
        match backup {
            Some(content) => {
                let _ = std::fs::write(path, content);
            }
            None => {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_then_replace_round_trip() {
        let dir = tempdir().unwrap();
        let vcs = FilesystemVcs::new(dir.path());
        let create = Patch {
            action: PatchAction::Create,
            file: "a.txt".into(),
            search_block: None,
            replace_block: Some("hello".into()),
        };
        vcs.apply(&[create]).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello");

        let replace = Patch {
            action: PatchAction::Replace,
            file: "a.txt".into(),
            search_block: Some("hello".into()),
            replace_block: Some("world".into()),
        };
        vcs.apply(&[replace]).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "world");
    }

    #[tokio::test]
    async fn failed_patch_rolls_back_earlier_patches_in_batch() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "original").unwrap();
        let vcs = FilesystemVcs::new(dir.path());

        let good = Patch {
            action: PatchAction::Replace,
            file: "a.txt".into(),
            search_block: Some("original".into()),
            replace_block: Some("changed".into()),
        };
        let bad = Patch {
            action: PatchAction::Replace,
            file: "a.txt".into(),
            search_block: Some("not-present".into()),
            replace_block: Some("x".into()),
        };
        let err = vcs.apply(&[good, bad]).await.unwrap_err();
        assert!(err.error.contains("search block not found"));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "original");
    }

    #[tokio::test]
    async fn delete_missing_file_is_enoent() {
        let dir = tempdir().unwrap();
        let vcs = FilesystemVcs::new(dir.path());
        let delete = Patch {
            action: PatchAction::Delete,
            file: "missing.txt".into(),
            search_block: None,
            replace_block: None,
        };
        let err = vcs.apply(&[delete]).await.unwrap_err();
        assert!(err.error.contains("ENOENT"));
    }
}
