//! Capability interfaces for every collaborator the Smart Pipeline drives
//! (spec.md §6 "Library surface", §9 "Duck-typed collaborators").
//!
//! Each trait is small and independently mockable; the orchestrator feature-
//! detects optional methods (`review_builder_output`) once at construction
//! rather than branching on a collaborator's concrete type.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    AgentRequest, ArchitectResponse, ArchitectReview, AssembleOptions, BuilderResponse,
    ContextBundle, CriticResult, FulfillResult, LaneKey, Lane, MemoryRecord, Patch,
    Plan, ResearchOutput,
};

/// Options carried into an architect planning call (spec.md §4.1 step 3).
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub instruction_hint: Option<String>,
    pub response_format: Option<String>,
    pub plan_hint: Option<Plan>,
    pub validate_only: bool,
}

/// The index/search subsystem, entirely external (spec.md §1).
#[async_trait]
pub trait IndexClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<crate::types::SearchHit>>;
    async fn tree(&self, max_depth: usize) -> Result<String>;
    async fn open_snippet(&self, path: &str) -> Result<Option<String>>;
    async fn symbols(&self, path: &str) -> Result<Option<String>>;
    async fn ast(&self, path: &str) -> Result<Option<String>>;
    async fn impact_graph(&self, path: &str) -> Result<Option<String>>;
    async fn memory_recall(&self, request: &str) -> Result<Vec<String>>;
    async fn get_profile(&self) -> Result<Vec<String>>;
    async fn stats(&self) -> Result<crate::types::IndexStats>;
    async fn health_check(&self) -> Result<()>;
}

/// Produces context bundles and fulfills agent requests (spec.md §4.2).
#[async_trait]
pub trait ContextAssembler: Send + Sync {
    async fn assemble(&self, request: &str, options: AssembleOptions) -> Result<ContextBundle>;
    async fn run_research_tools(
        &self,
        request: &str,
        context: &ContextBundle,
    ) -> Result<ResearchOutput>;
    async fn fulfill_agent_request(&self, request: &AgentRequest) -> Result<FulfillResult>;
}

/// Calls the architect agent; `plan`/`plan_with_request` return raw,
/// unparsed responses that [`crate::architect::ArchitectAdapter`] classifies
/// and repairs. `review_builder_output` is optional — feature-detected via
/// [`ArchitectPlanner::supports_review`].
#[async_trait]
pub trait ArchitectPlanner: Send + Sync {
    async fn plan(&self, context: &ContextBundle, lane_id: &str) -> Result<ArchitectResponse>;

    async fn plan_with_request(
        &self,
        context: &ContextBundle,
        opts: PlanOptions,
        lane_id: &str,
    ) -> Result<ArchitectResponse>;

    fn supports_review(&self) -> bool {
        false
    }

    async fn review_builder_output(
        &self,
        _plan: &Plan,
        _touched_files: &[String],
        _lane_id: &str,
    ) -> Result<ArchitectReview> {
        anyhow::bail!("review_builder_output not supported by this collaborator")
    }
}

/// Calls the builder agent.
#[async_trait]
pub trait BuilderRunner: Send + Sync {
    async fn run(&self, plan: &Plan, context: &ContextBundle, lane_id: &str)
        -> Result<BuilderResponse>;
}

/// Applies patches to the workspace (external collaborator, spec.md §1).
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Applies `patches` atomically: all succeed or all are rolled back.
    async fn apply(&self, patches: &[Patch]) -> Result<Vec<String>, crate::error::PatchApplyFailure>;
}

/// Calls the critic agent.
#[async_trait]
pub trait CriticEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        plan: &Plan,
        builder_output: &crate::types::BuilderRunResult,
        touched_files: &[String],
        lane_id: &str,
    ) -> Result<CriticResult>;
}

/// Persists lessons learned from a run (spec.md §4.1 step 8).
#[async_trait]
pub trait MemoryWriteback: Send + Sync {
    async fn persist(&self, record: MemoryRecord) -> Result<()>;
}

/// Structured event sink (spec.md §4.1 `logger`).
#[async_trait]
pub trait Logger: Send + Sync {
    async fn log(&self, event_type: &str, data: serde_json::Value);
    async fn write_phase_artifact(
        &self,
        phase: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<String>;
}

/// Per-phase conversation lane storage (spec.md §4.3).
#[async_trait]
pub trait ContextManager: Send + Sync {
    async fn get_lane(&self, key: LaneKey) -> Lane;
    async fn append(&self, lane_id: &str, role: &str, content: &str) -> Result<()>;
}

/// Outcome of [`OnPhaseProviderFailure`].
#[derive(Debug, Clone, Default)]
pub struct ProviderFailureOutcome {
    pub switched: bool,
    pub note: Option<String>,
}

/// Hook invoked when an agent raises a provider-auth/rate-limit failure, or
/// a repeated deterministic patch failure opts into fallback (spec.md §4.1
/// step 5).
#[async_trait]
pub trait OnPhaseProviderFailure: Send + Sync {
    async fn handle(&self, phase: &str, error: &str) -> ProviderFailureOutcome;
}

/// An [`OnPhaseProviderFailure`] that never switches providers.
pub struct NeverSwitch;

#[async_trait]
impl OnPhaseProviderFailure for NeverSwitch {
    async fn handle(&self, _phase: &str, _error: &str) -> ProviderFailureOutcome {
        ProviderFailureOutcome::default()
    }
}
