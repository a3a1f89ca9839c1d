//! Error taxonomy for the orchestrator.
//!
//! Adapters classify failures into a small tagged set instead of relying on
//! string matching throughout the pipeline. String regexes remain available
//! as a fallback classifier for errors raised by collaborators that don't
//! tag their own failures (see [`classify_provider_text`] and
//! [`DeterministicKind::from_message`]).

use thiserror::Error;

/// The orchestrator's own error taxonomy, surfaced to callers of
/// [`crate::pipeline::SmartPipeline::run`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("deep investigation quota unmet: {code}")]
    DeepInvestigationQuotaUnmet {
        code: String,
        remediation: Vec<String>,
    },

    #[error("deep investigation evidence gate unmet: {code}")]
    DeepInvestigationEvidenceUnmet {
        code: String,
        remediation: Vec<String>,
    },

    #[error("deep investigation budget exceeded: {code}")]
    DeepInvestigationBudgetUnmet {
        code: String,
        remediation: Vec<String>,
    },

    #[error("Architect quality gate failed before builder: {reason}")]
    ArchitectQualityGateFailed { reason: QualityGateReason },

    #[error("patch apply failed: {0}")]
    PatchApply(#[from] PatchApplyFailure),

    #[error("plan hint validation failed: {0}")]
    PlanHintValidation(String),

    #[error("provider failure: {0}")]
    Provider(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("agent failure: {0}")]
    Agent(String),
}

/// Reasons the pre-builder quality gate fails closed (spec.md §4.1 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityGateReason {
    BlockingArchitectWarnings,
    UnresolvedArchitectRequest,
    InvalidTargetPaths,
    MissingConcreteTargets,
    LowRequestTargetAlignmentCritical,
}

impl std::fmt::Display for QualityGateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BlockingArchitectWarnings => "blocking_architect_warnings",
            Self::UnresolvedArchitectRequest => "unresolved_architect_request",
            Self::InvalidTargetPaths => "invalid_target_paths",
            Self::MissingConcreteTargets => "missing_concrete_targets",
            Self::LowRequestTargetAlignmentCritical => "low_request_target_alignment_critical",
        };
        f.write_str(s)
    }
}

/// A structured patch-apply failure, preserved verbatim from the builder
/// adapter (spec.md §3 "Builder Run Result" / apply failure shape).
#[derive(Debug, Clone, Error)]
#[error("{source_label}: {error}")]
pub struct PatchApplyFailure {
    pub source_label: PatchApplySource,
    pub error: String,
    pub patches: Vec<crate::types::Patch>,
    pub rollback_attempted: bool,
    pub rollback_ok: bool,
    pub raw_output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchApplySource {
    InterpreterPrimary,
    InterpreterRetry,
    BuilderPatchProcessing,
}

impl std::fmt::Display for PatchApplySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InterpreterPrimary => "interpreter_primary",
            Self::InterpreterRetry => "interpreter_retry",
            Self::BuilderPatchProcessing => "builder_patch_processing",
        };
        f.write_str(s)
    }
}

/// Deterministic classification of a patch-apply failure's message, used to
/// decide whether a single architect-repair pass is owed (spec.md §4.1 step
/// 5, "Builder-specified recoveries").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeterministicKind {
    Enoent,
    SearchBlockMissing,
    PatchParse,
    DisallowedFiles,
}

impl DeterministicKind {
    /// Classify by message regex, preferring `disallowed_files` when a
    /// message mixes parse and disallowed-file signals.
    pub fn from_message(message: &str) -> Option<Self> {
        let disallowed = message.contains("not in plan targets") || message.contains("disallowed");
        if disallowed {
            return Some(Self::DisallowedFiles);
        }
        if message.contains("ENOENT") {
            return Some(Self::Enoent);
        }
        if message.to_lowercase().contains("search block not found") {
            return Some(Self::SearchBlockMissing);
        }
        let parse_like = message.contains("not valid JSON")
            || message.contains("Patch parsing failed")
            || message.contains("empty patches array");
        if parse_like {
            return Some(Self::PatchParse);
        }
        None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enoent => "enoent",
            Self::SearchBlockMissing => "search_block_missing",
            Self::PatchParse => "patch_parse",
            Self::DisallowedFiles => "disallowed_files",
        }
    }
}

/// Fallback provider/rate-limit classifier over raw error text, used when an
/// adapter doesn't already tag its own failure (spec.md §9 "Design Notes").
pub fn classify_provider_text(message: &str) -> bool {
    message.contains("AUTH_ERROR") || message.contains("429") || message.contains("usage_limit_reached")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_kind_prefers_disallowed_over_parse() {
        let msg = "Patch parsing failed but file.ts is not in plan targets";
        assert_eq!(
            DeterministicKind::from_message(msg),
            Some(DeterministicKind::DisallowedFiles)
        );
    }

    #[test]
    fn deterministic_kind_matches_patch_parse() {
        let msg = "Patch parsing failed. initial=Patch output is not valid JSON; retry=Patch payload includes empty patches array";
        assert_eq!(
            DeterministicKind::from_message(msg),
            Some(DeterministicKind::PatchParse)
        );
    }

    #[test]
    fn deterministic_kind_matches_search_block_missing() {
        assert_eq!(
            DeterministicKind::from_message("Search block not found in target file"),
            Some(DeterministicKind::SearchBlockMissing)
        );
    }

    #[test]
    fn provider_text_classifier() {
        assert!(classify_provider_text("AUTH_ERROR: token expired"));
        assert!(classify_provider_text("rate limited: 429 too many requests"));
        assert!(!classify_provider_text("plain old bug"));
    }
}
