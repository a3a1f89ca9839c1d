//! The data model shared by every phase of the pipeline (spec.md §3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a file plays in a [`ContextBundle`]'s selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Focus,
    Periphery,
}

/// A single file record carried in a context bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFile {
    pub path: String,
    pub role: FileRole,
    pub content: String,
    pub size: usize,
    pub truncated: bool,
    pub slice_strategy: Option<String>,
    pub origin: String,
}

/// A single search hit (spec.md §3 "search_results").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub path: String,
    pub score: f64,
}

/// Results for one expanded query.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

/// `selection` on a [`ContextBundle`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Selection {
    pub focus: Vec<String>,
    pub periphery: Vec<String>,
    pub all: Vec<String>,
    pub low_confidence: bool,
}

/// Confidence band for the request digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// `query_signals` on a [`ContextBundle`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuerySignals {
    pub keywords: Vec<String>,
    pub keyword_phrases: Vec<String>,
}

/// `request_digest` on a [`ContextBundle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDigest {
    pub summary: String,
    pub refined_query: String,
    pub candidate_files: Vec<String>,
    pub confidence: Confidence,
}

/// `project_info` on a [`ContextBundle`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectInfo {
    pub workspace_root: String,
    pub readme_path: Option<String>,
    pub readme_summary: Option<String>,
}

/// `index` metadata on a [`ContextBundle`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexStats {
    pub last_updated_epoch_ms: i64,
    pub num_docs: usize,
}

/// Evidence gate thresholds for deep mode (spec.md §4.1 "deepInvestigation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceGate {
    pub min_search_hits: usize,
    pub min_open_or_snippet: usize,
    pub min_symbols_or_ast: usize,
    pub min_impact: usize,
    pub max_warnings: usize,
}

/// Per-tool-category quotas for deep mode research cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolQuota {
    pub search: usize,
    pub open_or_snippet: usize,
    pub symbols_or_ast: usize,
    pub impact: usize,
    pub tree: usize,
    pub dag_export: usize,
}

/// Cycle/time bounds for the research phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationBudget {
    pub min_cycles: usize,
    pub min_seconds: u64,
    pub max_cycles: usize,
}

/// One tool invocation record within a research cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: String,
    pub ok: bool,
    pub error: Option<String>,
    pub skipped: bool,
    pub notes: Option<String>,
}

/// Outputs accumulated across research cycles (spec.md §3 "Research Output").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResearchOutputs {
    pub search_results: Vec<SearchResult>,
    pub snippets: Vec<String>,
    pub symbols: Vec<String>,
    pub ast: Vec<String>,
    pub impact: Vec<String>,
    pub impact_diagnostics: Vec<String>,
    pub repo_map: Option<String>,
    pub dag_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResearchOutput {
    pub tool_runs: Vec<ToolRun>,
    pub warnings: Vec<String>,
    pub outputs: ResearchOutputs,
}

/// Status of the deep-mode research process recorded on a [`ContextBundle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchStatus {
    pub status: String,
    pub cycles: usize,
    pub tool_usage: BTreeMap<String, usize>,
    pub evidence_gate_met: bool,
    pub budget_met: bool,
}

/// The Context Bundle (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub request: String,
    pub queries: Vec<String>,
    pub search_results: Vec<SearchResult>,
    pub snippets: Vec<String>,
    pub symbols: Vec<String>,
    pub ast: Vec<String>,
    pub impact: Vec<String>,
    pub impact_diagnostics: Vec<String>,
    pub files: Vec<ContextFile>,
    pub selection: Selection,
    pub memory: Vec<String>,
    pub preferences_detected: Vec<String>,
    pub profile: Vec<String>,
    pub golden_examples: Vec<String>,
    pub index: IndexStats,
    pub repo_map: Option<String>,
    pub repo_map_raw: Option<String>,
    pub query_signals: QuerySignals,
    pub request_digest: RequestDigest,
    pub project_info: ProjectInfo,
    pub warnings: Vec<String>,
    pub missing: Vec<String>,
    pub research: Option<ResearchStatus>,
}

impl ContextBundle {
    /// Every path selected must resolve in `files` (spec.md §3 invariant).
    pub fn selection_is_resolvable(&self) -> bool {
        let known: std::collections::HashSet<&str> =
            self.files.iter().map(|f| f.path.as_str()).collect();
        self.selection
            .focus
            .iter()
            .chain(self.selection.periphery.iter())
            .all(|p| known.contains(p.as_str()) || self.repo_map_contains(p))
    }

    fn repo_map_contains(&self, path: &str) -> bool {
        self.repo_map
            .as_deref()
            .map(|m| m.contains(path))
            .unwrap_or(false)
    }
}

/// Options accepted by [`crate::collab::ContextAssembler::assemble`]
/// (spec.md §4.2).
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    pub additional_queries: Vec<String>,
    pub preferred_files: Vec<String>,
    pub recent_files: Vec<String>,
    pub force_focus_files: Vec<String>,
    pub skip_search_when_preferred: bool,
}

/// The Plan produced by the architect (spec.md §3 "Plan").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<String>,
    pub target_files: Vec<String>,
    pub risk_assessment: String,
    pub verification: Vec<String>,
    pub warnings: Vec<String>,
}

impl Plan {
    const PLACEHOLDER_TARGETS: &'static [&'static str] = &["path/to/file.ts", "path/to/file"];

    pub fn has_placeholder_targets(&self) -> bool {
        self.target_files
            .iter()
            .any(|t| Self::PLACEHOLDER_TARGETS.contains(&t.as_str()))
    }

    pub fn has_concrete_verification(&self) -> bool {
        if self.verification.is_empty() {
            return false;
        }
        let re = crate::architect::verification_regex();
        self.verification.iter().any(|v| re.is_match(v))
    }
}

/// Which textual shape an architect response arrived in
/// (spec.md §9 "Variant plan output parsing").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanResponseFormat {
    Dsl,
    Json,
    Prose,
}

/// One architect pass's artifact payload (spec.md §4.1 step 3h).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectOutputArtifact {
    pub pass: usize,
    pub source: String,
    pub raw_output: String,
    pub normalized_output: Option<Plan>,
    pub response_format_type: Option<PlanResponseFormat>,
    pub structural_grounding: serde_json::Value,
    pub target_drift: serde_json::Value,
}

/// `{request_id, needs[]}` raised by an agent mid-phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub request_id: String,
    pub needs: Vec<String>,
}

/// Raw response from the architect collaborator before parsing.
#[derive(Debug, Clone)]
pub enum ArchitectResponse {
    Plan(Plan, PlanResponseFormat, String),
    AgentRequest(AgentRequest),
}

/// `{version, request_id, results, meta}` returned by
/// `fulfillAgentRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillResult {
    pub version: String,
    pub request_id: String,
    pub results: Vec<serde_json::Value>,
    pub meta: serde_json::Value,
}

/// `{status, reasons, feedback, warnings}` from `reviewBuilderOutput`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectReview {
    pub status: ReviewStatus,
    pub reasons: Vec<String>,
    pub feedback: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pass,
    Retry,
}

/// One patch action (spec.md §3 "Builder Run Result").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub action: PatchAction,
    pub file: String,
    pub search_block: Option<String>,
    pub replace_block: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchAction {
    Create,
    Replace,
    Delete,
}

/// A `{queries[], files[]}` context request raised by the builder.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextRequest {
    pub queries: Vec<String>,
    pub files: Vec<String>,
}

/// A chat-shaped message (role/content), matching `finalMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Raw response from the builder collaborator before the adapter applies it.
#[derive(Debug, Clone)]
pub enum BuilderResponse {
    Finalize(Message),
    Apply(Vec<Patch>),
    NeedsContext(ContextRequest),
}

/// The result of one builder attempt after apply (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderRunResult {
    pub final_message: Message,
    pub tool_calls_executed: usize,
    pub context_request: Option<ContextRequest>,
    pub patches: Vec<Patch>,
}

/// `{status, reasons, retryable, request?}` from the critic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticResult {
    pub status: CriticStatus,
    pub reasons: Vec<String>,
    pub retryable: bool,
    pub request: Option<AgentRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CriticStatus {
    Pass,
    Fail,
}

/// Scope identifying a run for lane-id construction (spec.md §4.1
/// `laneScope`).
#[derive(Debug, Clone)]
pub struct LaneScope {
    pub job_id: String,
    pub task_id: String,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneRole {
    Librarian,
    Research,
    Architect,
    Builder,
    Critic,
}

impl LaneRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Librarian => "librarian",
            Self::Research => "research",
            Self::Architect => "architect",
            Self::Builder => "builder",
            Self::Critic => "critic",
        }
    }
}

/// Key identifying a lane: `"<jobId>:<taskId>:<role>[:attempt-N]"`.
#[derive(Debug, Clone)]
pub struct LaneKey {
    pub scope: LaneScope,
    pub role: LaneRole,
    pub attempt: Option<usize>,
    pub ephemeral: bool,
}

impl LaneKey {
    pub fn id(&self) -> String {
        let base = format!(
            "{}:{}:{}",
            self.scope.job_id,
            self.scope.task_id,
            self.role.as_str()
        );
        match self.attempt {
            Some(n) => format!("{base}:attempt-{n}"),
            None => base,
        }
    }
}

/// A lane message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneMessage {
    pub role: String,
    pub content: String,
    pub bytes: usize,
    pub ts: DateTime<Utc>,
}

/// A conversation lane (spec.md §3 "Lane").
#[derive(Debug, Clone)]
pub struct Lane {
    pub lane_id: String,
    pub messages: Vec<LaneMessage>,
    pub bytes: usize,
    pub role: LaneRole,
    pub ephemeral: bool,
}

/// Record persisted by [`crate::collab::MemoryWriteback::persist`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub failures: usize,
    pub max_retries: usize,
    pub lesson: String,
}

/// Final result of [`crate::pipeline::SmartPipeline::run`].
#[derive(Debug, Clone)]
pub struct RunResult {
    pub plan: Option<Plan>,
    pub critic_result: Option<CriticResult>,
    pub attempts: usize,
    pub context: ContextBundle,
    pub research: Option<ResearchOutput>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pass,
    Fail,
}
