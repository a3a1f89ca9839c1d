//! Builder Runner adapter: turns a raw [`BuilderResponse`] into a
//! [`BuilderRunResult`], applying patches via the [`VcsClient`] collaborator
//! and surfacing apply failures as structured [`PatchApplyFailure`]s
//! (spec.md §4.1 step 5, §3 "Builder Run Result").

use std::sync::Arc;

use anyhow::Result;

use crate::collab::VcsClient;
use crate::error::{PatchApplyFailure, PatchApplySource};
use crate::types::{BuilderResponse, BuilderRunResult, ContextRequest, Message, Patch};

pub struct BuilderAdapter {
    pub vcs: Arc<dyn VcsClient>,
}

impl BuilderAdapter {
    pub fn new(vcs: Arc<dyn VcsClient>) -> Self {
        Self { vcs }
    }

    /// Resolve a raw builder response into a result, applying patches if the
    /// builder chose the apply path. `retry` indicates this is the second
    /// interpreter attempt (affects the apply-failure `source_label`).
    pub async fn resolve(
        &self,
        response: BuilderResponse,
        retry: bool,
    ) -> Result<ResolvedBuilder, PatchApplyFailure> {
        match response {
            BuilderResponse::Finalize(message) => Ok(ResolvedBuilder::Result(BuilderRunResult {
                final_message: message,
                tool_calls_executed: 0,
                context_request: None,
                patches: Vec::new(),
            })),
            BuilderResponse::NeedsContext(request) => Ok(ResolvedBuilder::NeedsContext(request)),
            BuilderResponse::Apply(patches) => {
                let applied = self.vcs.apply(&patches).await;
                match applied {
                    Ok(touched) => Ok(ResolvedBuilder::Result(BuilderRunResult {
                        final_message: Message {
                            role: "builder".to_string(),
                            content: format!("applied {} patch(es)", touched.len()),
                        },
                        tool_calls_executed: patches.len(),
                        context_request: None,
                        patches,
                    })),
                    Err(mut failure) => {
                        failure.source_label = if retry {
                            PatchApplySource::InterpreterRetry
                        } else {
                            PatchApplySource::InterpreterPrimary
                        };
                        Err(failure)
                    }
                }
            }
        }
    }
}

pub enum ResolvedBuilder {
    Result(BuilderRunResult),
    NeedsContext(ContextRequest),
}

/// True if the builder's requested patch set references a file outside the
/// plan's declared targets (spec.md "disallowed_files").
pub fn has_disallowed_files(patches: &[Patch], target_files: &[String]) -> bool {
    patches.iter().any(|p| !target_files.contains(&p.file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatchAction;
    use async_trait::async_trait;

    struct FakeVcs {
        fail: bool,
    }

    #[async_trait]
    impl VcsClient for FakeVcs {
        async fn apply(&self, patches: &[Patch]) -> Result<Vec<String>, PatchApplyFailure> {
            if self.fail {
                return Err(PatchApplyFailure {
                    source_label: PatchApplySource::InterpreterPrimary,
                    error: "ENOENT: no such file".to_string(),
                    patches: patches.to_vec(),
                    rollback_attempted: true,
                    rollback_ok: true,
                    raw_output: None,
                });
            }
            Ok(patches.iter().map(|p| p.file.clone()).collect())
        }
    }

    #[tokio::test]
    async fn finalize_passes_through() {
        let adapter = BuilderAdapter::new(Arc::new(FakeVcs { fail: false }));
        let result = adapter
            .resolve(
                BuilderResponse::Finalize(Message { role: "builder".into(), content: "done".into() }),
                false,
            )
            .await
            .unwrap();
        match result {
            ResolvedBuilder::Result(r) => assert_eq!(r.final_message.content, "done"),
            _ => panic!("expected Result"),
        }
    }

    #[tokio::test]
    async fn apply_failure_is_classified() {
        let adapter = BuilderAdapter::new(Arc::new(FakeVcs { fail: true }));
        let patches = vec![Patch {
            action: PatchAction::Replace,
            file: "a.ts".into(),
            search_block: Some("x".into()),
            replace_block: Some("y".into()),
        }];
        let err = adapter.resolve(BuilderResponse::Apply(patches), false).await.unwrap_err();
        assert_eq!(err.source_label, PatchApplySource::InterpreterPrimary);
        assert!(err.error.contains("ENOENT"));
    }

    #[test]
    fn disallowed_files_detected() {
        let patches = vec![Patch {
            action: PatchAction::Create,
            file: "b.ts".into(),
            search_block: None,
            replace_block: None,
        }];
        assert!(has_disallowed_files(&patches, &["a.ts".to_string()]));
        assert!(!has_disallowed_files(&patches, &["b.ts".to_string()]));
    }
}
