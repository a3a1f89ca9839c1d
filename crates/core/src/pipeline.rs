//! The Smart Pipeline: sequences Librarian → Research → Architect → Builder
//! → Critic, enforcing every gate, retry bound, and recovery strategy named
//! in spec.md §4.1. This is the hard part of the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use orc_config::PipelineConfig;

use crate::architect::{self, verification_is_degenerate};
use crate::builder::{BuilderAdapter, ResolvedBuilder};
use crate::collab::{
    ArchitectPlanner, BuilderRunner, ContextAssembler, ContextManager, CriticEvaluator, Logger,
    MemoryWriteback, OnPhaseProviderFailure, PlanOptions, VcsClient,
};
use crate::error::{classify_provider_text, DeterministicKind, OrchestratorError, QualityGateReason};
use crate::types::{
    AgentRequest, ArchitectResponse, AssembleOptions, BuilderRunResult, ContextBundle, CriticResult,
    CriticStatus, LaneKey, LaneRole, LaneScope, MemoryRecord, Plan, ResearchOutput, ResearchStatus,
    RunResult, RunStatus,
};

/// Collaborators wired into one pipeline instance (spec.md §6 "Library
/// surface"). Injected once at construction; `architect.supports_review()`
/// is feature-detected rather than branching on concrete type.
pub struct Collaborators {
    pub assembler: Arc<dyn ContextAssembler>,
    pub architect: Arc<dyn ArchitectPlanner>,
    pub builder: Arc<dyn BuilderRunner>,
    pub vcs: Arc<dyn VcsClient>,
    pub critic: Arc<dyn CriticEvaluator>,
    pub memory: Arc<dyn MemoryWriteback>,
    pub logger: Arc<dyn Logger>,
    pub lanes: Arc<dyn ContextManager>,
    pub on_provider_failure: Arc<dyn OnPhaseProviderFailure>,
}

pub struct SmartPipeline {
    collab: Collaborators,
    config: PipelineConfig,
    lane_scope: LaneScope,
}

const MAX_ARCHITECT_PASSES: usize = 3;

impl SmartPipeline {
    pub fn new(collab: Collaborators, config: PipelineConfig, lane_scope: LaneScope) -> Self {
        Self { collab, config, lane_scope }
    }

    fn lane_id(&self, role: LaneRole, attempt: Option<usize>) -> String {
        LaneKey { scope: self.lane_scope_clone(), role, attempt, ephemeral: false }.id()
    }

    fn lane_scope_clone(&self) -> LaneScope {
        LaneScope {
            job_id: self.lane_scope.job_id.clone(),
            task_id: self.lane_scope.task_id.clone(),
            run_id: self.lane_scope.run_id.clone(),
        }
    }

    async fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.collab.logger.log(event_type, data).await;
    }

    async fn artifact(&self, phase: &str, kind: &str, payload: serde_json::Value) {
        let _ = self.collab.logger.write_phase_artifact(phase, kind, payload).await;
    }

    /// `run(request) -> RunResult` (spec.md §4.1).
    pub async fn run(&self, request: &str) -> Result<RunResult, OrchestratorError> {
        // --- 1. Librarian phase -------------------------------------------------
        self.emit("phase_start", serde_json::json!({"phase": "librarian"})).await;
        self.artifact("librarian", "input", serde_json::json!({"request": request})).await;
        let mut context = self
            .collab
            .assembler
            .assemble(request, AssembleOptions::default())
            .await
            .map_err(|e| OrchestratorError::Agent(e.to_string()))?;
        self.artifact("librarian", "output", serde_json::to_value(&context).unwrap_or_default()).await;
        self.emit("phase_end", serde_json::json!({"phase": "librarian"})).await;

        // --- 2. Deep-mode research phase -----------------------------------------
        let mut research: Option<ResearchOutput> = None;
        if self.config.deep_mode {
            research = Some(self.run_research_phase(request, &mut context).await?);
        }

        // --- 3/4. Architect phase + pre-builder quality gate --------------------
        let fast_path = self.config.fast_path.evaluate(request);
        if fast_path && self.config.deep_mode {
            self.emit("fast_path_overridden", serde_json::json!({})).await;
        }
        let use_fast_path = fast_path && !self.config.deep_mode;

        let mut plan = if use_fast_path {
            let plan = fast_path_plan(&context);
            self.artifact(
                "architect",
                "output",
                serde_json::json!({"pass": 1, "source": "fast_path", "raw_output": ""}),
            )
            .await;
            plan
        } else {
            self.run_architect_loop(request, &mut context).await?
        };

        // --- 5/6. Builder phase ---------------------------------------------------
        let builder_adapter = BuilderAdapter::new(self.collab.vcs.clone());
        let mut attempts = 0usize;
        let mut critic_result: Option<CriticResult> = None;
        let mut touched_files: Vec<String> = Vec::new();
        let mut last_builder_output: Option<BuilderRunResult> = None;
        let mut status = RunStatus::Fail;

        'retry_loop: loop {
            let lane_id = if attempts == 0 {
                self.lane_id(LaneRole::Builder, None)
            } else {
                self.lane_id(LaneRole::Builder, Some(attempts))
            };

            let builder_outcome = self
                .run_builder_with_recovery(request, &mut plan, &mut context, &builder_adapter, &lane_id)
                .await;

            let builder_result = match builder_outcome {
                Ok(result) => result,
                Err(BuilderLoopOutcome::FailClosed) => {
                    status = RunStatus::Fail;
                    break 'retry_loop;
                }
                Err(BuilderLoopOutcome::Error(message)) => {
                    return Err(OrchestratorError::Agent(message));
                }
            };

            touched_files = builder_result.patches.iter().map(|p| p.file.clone()).collect();

            if self.collab.architect.supports_review() && !touched_files.is_empty() {
                if let Ok(review) = self
                    .collab
                    .architect
                    .review_builder_output(&plan, &touched_files, &lane_id)
                    .await
                {
                    if review.status == crate::types::ReviewStatus::Retry {
                        let actionable = !review.reasons.is_empty() || !review.feedback.is_empty();
                        if !actionable {
                            self.emit("architect_review_retry_non_actionable", serde_json::json!({})).await;
                        } else if attempts < self.config.max_retries {
                            attempts += 1;
                            continue 'retry_loop;
                        }
                    } else if !semantic_guard_ok(request, &plan, &touched_files) {
                        self.emit("architect_review_semantic_guard", serde_json::json!({"ok": false})).await;
                        if attempts < self.config.max_retries {
                            attempts += 1;
                            continue 'retry_loop;
                        }
                    }
                }
            }

            last_builder_output = Some(builder_result.clone());

            // --- 7. Critic phase ---------------------------------------------------
            let critic_lane = self.lane_id(LaneRole::Critic, if attempts == 0 { None } else { Some(attempts) });
            let mut result = self
                .collab
                .critic
                .evaluate(&plan, &builder_result, &touched_files, &critic_lane)
                .await
                .map_err(|e| OrchestratorError::Agent(e.to_string()))?;

            let mut refreshes = 0usize;
            while let Some(req) = result.request.clone() {
                if refreshes >= self.config.max_context_refreshes {
                    break;
                }
                refreshes += 1;
                let _ = self.collab.assembler.fulfill_agent_request(&req).await;
                result = self
                    .collab
                    .critic
                    .evaluate(&plan, &builder_result, &touched_files, &critic_lane)
                    .await
                    .map_err(|e| OrchestratorError::Agent(e.to_string()))?;
            }

            match result.status {
                CriticStatus::Pass => {
                    critic_result = Some(result);
                    status = RunStatus::Pass;
                    break 'retry_loop;
                }
                CriticStatus::Fail => {
                    if !result.retryable {
                        critic_result = Some(result);
                        status = RunStatus::Fail;
                        break 'retry_loop;
                    }
                    if attempts + 1 < self.config.max_retries {
                        attempts += 1;
                        critic_result = Some(result);
                        continue 'retry_loop;
                    } else {
                        critic_result = Some(result);
                        status = RunStatus::Fail;
                        break 'retry_loop;
                    }
                }
            }
        }

        // --- 8. Memory writeback --------------------------------------------------
        match status {
            RunStatus::Pass => {
                if !context.preferences_detected.is_empty() {
                    let _ = self
                        .collab
                        .memory
                        .persist(MemoryRecord { failures: 0, max_retries: self.config.max_retries, lesson: String::new() })
                        .await;
                }
            }
            RunStatus::Fail => {
                let reasons = critic_result
                    .as_ref()
                    .map(|r| r.reasons.join("; "))
                    .unwrap_or_default();
                let failures = if attempts == 0 { 0 } else { attempts + 1 };
                let _ = self
                    .collab
                    .memory
                    .persist(MemoryRecord { failures, max_retries: self.config.max_retries, lesson: reasons })
                    .await;
            }
        }

        let _ = last_builder_output;
        Ok(RunResult { plan: Some(plan), critic_result, attempts: attempts + 1, context, research, status })
    }

    async fn run_research_phase(
        &self,
        request: &str,
        context: &mut ContextBundle,
    ) -> Result<ResearchOutput, OrchestratorError> {
        let cfg = &self.config.deep_investigation;
        let mut cycles = 0usize;
        let mut usage: HashMap<String, usize> = HashMap::new();
        let mut merged = ResearchOutput::default();

        loop {
            let cycle_output = self
                .collab
                .assembler
                .run_research_tools(request, context)
                .await
                .map_err(|e| OrchestratorError::Agent(e.to_string()))?;
            cycles += 1;
            for run in &cycle_output.tool_runs {
                if run.ok && !run.skipped {
                    *usage.entry(run.tool.clone()).or_insert(0) += 1;
                }
            }
            merged.tool_runs.extend(cycle_output.tool_runs.clone());
            merged.warnings.extend(cycle_output.warnings.clone());
            merged.outputs.search_results.extend(cycle_output.outputs.search_results.clone());
            merged.outputs.snippets.extend(cycle_output.outputs.snippets.clone());

            let quota_met = usage.get("search").copied().unwrap_or(0) >= cfg.tool_quota.search
                && usage.get("open_snippet").copied().unwrap_or(0) >= cfg.tool_quota.open_or_snippet
                && usage.get("tree").copied().unwrap_or(0) >= cfg.tool_quota.tree
                && usage.get("symbols_or_ast").copied().unwrap_or(0) >= cfg.tool_quota.symbols_or_ast
                && usage.get("impact").copied().unwrap_or(0) >= cfg.tool_quota.impact
                && usage.get("dag_export").copied().unwrap_or(0) >= cfg.tool_quota.dag_export;

            let total_hits: usize = merged.outputs.search_results.iter().map(|r| r.hits.len()).sum();
            let evidence_met = total_hits >= cfg.evidence_gate.min_search_hits
                && merged.warnings.len() <= cfg.evidence_gate.max_warnings;

            let min_cycles_met = cycles >= cfg.investigation_budget.min_cycles;

            self.emit(
                "investigation_telemetry",
                serde_json::json!({
                    "phase": "research",
                    "status": if quota_met && evidence_met { "ok" } else { "pending" },
                    "cycles": cycles,
                }),
            )
            .await;

            if min_cycles_met && quota_met && evidence_met {
                break;
            }

            if cycles > cfg.investigation_budget.max_cycles {
                if !min_cycles_met {
                    self.emit("investigation_budget_failed", serde_json::json!({})).await;
                    return Err(OrchestratorError::DeepInvestigationBudgetUnmet {
                        code: "deep_investigation_budget_unmet".to_string(),
                        remediation: vec!["increase investigationBudget.maxCycles".to_string()],
                    });
                }
                if !quota_met {
                    let failing: Vec<_> = merged.tool_runs.iter().filter(|r| !r.ok).collect();
                    let only_docdex_failures = !failing.is_empty()
                        && failing
                            .iter()
                            .all(|r| r.error.as_deref().map(|e| e.starts_with("research_docdex_")).unwrap_or(false));
                    if only_docdex_failures {
                        self.emit("investigation_quota_warning_tolerated", serde_json::json!({})).await;
                        break;
                    }
                    self.emit("investigation_quota_failed", serde_json::json!({})).await;
                    return Err(OrchestratorError::DeepInvestigationQuotaUnmet {
                        code: "deep_investigation_quota_unmet".to_string(),
                        remediation: vec!["broaden search queries".to_string()],
                    });
                }
                if !evidence_met {
                    if merged.warnings.len() > cfg.evidence_gate.max_warnings && total_hits >= cfg.evidence_gate.min_search_hits {
                        self.emit("investigation_evidence_warning_tolerated", serde_json::json!({})).await;
                        break;
                    }
                    self.emit("investigation_evidence_failed", serde_json::json!({})).await;
                    return Err(OrchestratorError::DeepInvestigationEvidenceUnmet {
                        code: "deep_investigation_evidence_unmet".to_string(),
                        remediation: vec!["widen evidence gate or add coverage".to_string()],
                    });
                }
                break;
            }
        }

        context.research = Some(ResearchStatus {
            status: "ok".to_string(),
            cycles,
            tool_usage: usage.into_iter().collect(),
            evidence_gate_met: true,
            budget_met: true,
        });

        Ok(merged)
    }

    async fn run_architect_loop(
        &self,
        request: &str,
        context: &mut ContextBundle,
    ) -> Result<Plan, OrchestratorError> {
        let lane_id = self.lane_id(LaneRole::Architect, None);
        let mut pass = 0usize;
        let mut agent_request_recovered = false;
        let mut non_dsl_retried = false;
        let mut invalid_target_retried = false;
        let mut pending_opts = PlanOptions::default();
        let mut pending_source = "planner";

        loop {
            pass += 1;
            if pass > MAX_ARCHITECT_PASSES {
                return Err(OrchestratorError::ArchitectQualityGateFailed {
                    reason: QualityGateReason::BlockingArchitectWarnings,
                });
            }

            let opts = std::mem::take(&mut pending_opts);
            let source = pending_source;
            pending_source = "planner";
            let response = self
                .collab
                .architect
                .plan_with_request(context, opts, &lane_id)
                .await
                .map_err(|e| OrchestratorError::Agent(e.to_string()))?;

            let mut plan = match response {
                ArchitectResponse::Plan(plan, _format, raw) => {
                    self.artifact(
                        "architect",
                        "output",
                        serde_json::json!({"pass": pass, "source": source, "raw_output": raw}),
                    )
                    .await;
                    plan
                }
                ArchitectResponse::AgentRequest(req) => {
                    if agent_request_recovered {
                        return Err(OrchestratorError::ArchitectQualityGateFailed {
                            reason: QualityGateReason::UnresolvedArchitectRequest,
                        });
                    }
                    agent_request_recovered = true;
                    let _ = self.collab.assembler.fulfill_agent_request(&req).await;
                    *context = self
                        .collab
                        .assembler
                        .assemble(request, AssembleOptions::default())
                        .await
                        .map_err(|e| OrchestratorError::Agent(e.to_string()))?;
                    self.emit("architect_revision_requested", serde_json::json!({"request_id": req.request_id})).await;
                    pending_opts = PlanOptions {
                        instruction_hint: Some(format!(
                            "REVISION REQUIRED: architect_request_recovery fulfilled needs {:?} and refreshed context; produce a complete plan from it.",
                            req.needs
                        )),
                        ..Default::default()
                    };
                    continue;
                }
            };

            if plan.warnings.iter().any(|w| w == "architect_output_unstructured_plaintext") {
                if non_dsl_retried {
                    if agent_request_recovered {
                        return Err(OrchestratorError::ArchitectQualityGateFailed {
                            reason: QualityGateReason::UnresolvedArchitectRequest,
                        });
                    }
                    return Err(OrchestratorError::ArchitectQualityGateFailed {
                        reason: QualityGateReason::BlockingArchitectWarnings,
                    });
                }
                non_dsl_retried = true;
                pending_opts = PlanOptions {
                    instruction_hint: Some(
                        "Revise your previous response in place; do not restart from scratch.".to_string(),
                    ),
                    response_format: Some("dsl".to_string()),
                    ..Default::default()
                };
                pending_source = "revision_retry";
                continue;
            }

            if plan.target_files.is_empty() {
                if invalid_target_retried {
                    self.artifact("architect", "quality_gate_degrade", serde_json::json!({"pass": pass})).await;
                    return Err(OrchestratorError::ArchitectQualityGateFailed {
                        reason: QualityGateReason::MissingConcreteTargets,
                    });
                }
                invalid_target_retried = true;
                continue;
            }
            if plan.has_placeholder_targets() || !targets_resolve(&plan, context) {
                if invalid_target_retried {
                    self.artifact("architect", "quality_gate_degrade", serde_json::json!({"pass": pass})).await;
                    return Err(OrchestratorError::ArchitectQualityGateFailed {
                        reason: QualityGateReason::InvalidTargetPaths,
                    });
                }
                invalid_target_retried = true;
                continue;
            }

            if verification_is_degenerate(&plan.verification) {
                plan.verification = architect::synthesize_verification(&plan.target_files);
            }

            return Ok(plan);
        }
    }

    async fn run_builder_with_recovery(
        &self,
        request: &str,
        plan: &mut Plan,
        context: &mut ContextBundle,
        builder_adapter: &BuilderAdapter,
        lane_id: &str,
    ) -> Result<BuilderRunResult, BuilderLoopOutcome> {
        let mut context_refreshes = 0usize;
        let mut repaired_kinds: std::collections::HashSet<DeterministicKind> = std::collections::HashSet::new();
        let mut retry_interpreter = false;

        loop {
            let response = self
                .collab
                .builder
                .run(plan, context, lane_id)
                .await
                .map_err(|e| BuilderLoopOutcome::Error(e.to_string()))?;

            match builder_adapter.resolve(response, retry_interpreter).await {
                Ok(ResolvedBuilder::Result(result)) => return Ok(result),
                Ok(ResolvedBuilder::NeedsContext(req)) => {
                    if context_refreshes >= self.config.max_context_refreshes {
                        return Err(BuilderLoopOutcome::Error(
                            "builder_needs_context refresh budget exhausted".to_string(),
                        ));
                    }
                    context_refreshes += 1;
                    let mut options = AssembleOptions {
                        additional_queries: req.queries.clone(),
                        preferred_files: req.files.clone(),
                        force_focus_files: req.files.clone(),
                        ..Default::default()
                    };
                    options.skip_search_when_preferred = false;
                    *context = self
                        .collab
                        .assembler
                        .assemble(request, options)
                        .await
                        .map_err(|e| BuilderLoopOutcome::Error(e.to_string()))?;
                    self.emit("builder_needs_context", serde_json::json!({})).await;

                    self.replan_for_recovery(
                        plan,
                        context,
                        "builder_needs_context: the builder requested a context refresh. Do not restart from scratch.",
                        "builder_context_refresh",
                        None,
                    )
                    .await?;

                    retry_interpreter = false;
                    continue;
                }
                Err(failure) => {
                    if let Some(kind) = DeterministicKind::from_message(&failure.error) {
                        if !repaired_kinds.contains(&kind) {
                            repaired_kinds.insert(kind);
                            self.emit(
                                "builder_apply_failed_deterministic",
                                serde_json::json!({"kind": kind.as_str()}),
                            )
                            .await;

                            self.replan_for_recovery(
                                plan,
                                context,
                                &format!(
                                    "builder_repair: the previous patch failed deterministically ({}). Revise the plan to avoid this failure mode.",
                                    kind.as_str()
                                ),
                                "builder_deterministic_repair",
                                Some(kind.as_str()),
                            )
                            .await?;

                            retry_interpreter = true;
                            continue;
                        }
                        let outcome = self.collab.on_provider_failure.handle("builder", &failure.error).await;
                        if outcome.switched {
                            self.emit(
                                "phase_provider_fallback",
                                serde_json::json!({"reason": "deterministic_patch_parse"}),
                            )
                            .await;
                            retry_interpreter = true;
                            continue;
                        }
                        self.emit(
                            "builder_apply_failed_deterministic_no_repair",
                            serde_json::json!({"action": "fail_closed"}),
                        )
                        .await;
                        return Err(BuilderLoopOutcome::FailClosed);
                    }

                    if classify_provider_text(&failure.error) {
                        let outcome = self.collab.on_provider_failure.handle("builder", &failure.error).await;
                        if outcome.switched {
                            retry_interpreter = true;
                            continue;
                        }
                    }
                    return Err(BuilderLoopOutcome::Error(failure.error));
                }
            }
        }
    }

    /// Re-invokes the architect mid-builder-loop with a recovery hint naming
    /// the trigger, carrying the current plan as a hint so the architect
    /// revises it rather than starting over (spec.md §4.1 step 5).
    async fn replan_for_recovery(
        &self,
        plan: &mut Plan,
        context: &ContextBundle,
        instruction_hint: &str,
        artifact_source: &str,
        kind: Option<&str>,
    ) -> Result<(), BuilderLoopOutcome> {
        let architect_lane_id = self.lane_id(LaneRole::Architect, None);
        let opts = PlanOptions {
            instruction_hint: Some(instruction_hint.to_string()),
            plan_hint: Some(plan.clone()),
            ..Default::default()
        };
        let response = self
            .collab
            .architect
            .plan_with_request(context, opts, &architect_lane_id)
            .await
            .map_err(|e| BuilderLoopOutcome::Error(e.to_string()))?;

        match response {
            ArchitectResponse::Plan(new_plan, _format, raw) => {
                let mut payload = serde_json::json!({"source": artifact_source, "raw_output": raw});
                if let Some(kind) = kind {
                    payload["kind"] = serde_json::Value::String(kind.to_string());
                }
                self.artifact("architect", "output", payload).await;
                *plan = new_plan;
                Ok(())
            }
            ArchitectResponse::AgentRequest(_) => Err(BuilderLoopOutcome::Error(format!(
                "architect raised an agent request during {artifact_source} recovery"
            ))),
        }
    }
}

enum BuilderLoopOutcome {
    FailClosed,
    Error(String),
}

fn fast_path_plan(context: &ContextBundle) -> Plan {
    let target_files = context.selection.focus.clone();
    Plan {
        steps: vec!["Apply a minimal fast-path change based on recent context.".to_string()],
        target_files: if target_files.is_empty() { vec!["README.md".to_string()] } else { target_files },
        risk_assessment: "low".to_string(),
        verification: vec!["Run unit tests for the changed module".to_string()],
        warnings: Vec::new(),
    }
}

fn targets_resolve(plan: &Plan, context: &ContextBundle) -> bool {
    let known: std::collections::HashSet<&str> = context.files.iter().map(|f| f.path.as_str()).collect();
    plan.target_files.iter().all(|t| {
        known.contains(t.as_str()) || context.repo_map.as_deref().map(|m| m.contains(t.as_str())).unwrap_or(false)
    })
}

/// Orchestrator-side keyword coverage check between the request/plan steps
/// and the touched file set (spec.md §4.1 step 6 "semantic guard").
fn semantic_guard_ok(request: &str, plan: &Plan, touched: &[String]) -> bool {
    if touched.is_empty() {
        return false;
    }
    let haystack = touched.join(" ").to_lowercase();
    let keywords: Vec<String> = request
        .split_whitespace()
        .chain(plan.steps.iter().flat_map(|s| s.split_whitespace()))
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 3)
        .collect();
    if keywords.is_empty() {
        return true;
    }
    keywords.iter().any(|k| haystack.contains(k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::ContextManager as _;
    use crate::types::{
        AgentRequest as ArAgentRequest, BuilderResponse, ContextRequest, FileRole, FulfillResult, IndexStats, Message,
        Patch, PatchAction, ProjectInfo, QuerySignals, RequestDigest, Confidence, Selection, ContextFile,
    };
    use async_trait::async_trait;

    fn empty_context(request: &str, focus: Vec<String>) -> ContextBundle {
        ContextBundle {
            request: request.to_string(),
            queries: vec![request.to_string()],
            search_results: Vec::new(),
            snippets: Vec::new(),
            symbols: Vec::new(),
            ast: Vec::new(),
            impact: Vec::new(),
            impact_diagnostics: Vec::new(),
            files: focus
                .iter()
                .map(|p| ContextFile {
                    path: p.clone(),
                    role: FileRole::Focus,
                    content: "stub".into(),
                    size: 4,
                    truncated: false,
                    slice_strategy: None,
                    origin: "test".into(),
                })
                .collect(),
            selection: Selection { focus: focus.clone(), periphery: Vec::new(), all: focus.clone(), low_confidence: false },
            memory: Vec::new(),
            preferences_detected: Vec::new(),
            profile: Vec::new(),
            golden_examples: Vec::new(),
            index: IndexStats { last_updated_epoch_ms: 0, num_docs: 1 },
            repo_map: None,
            repo_map_raw: None,
            query_signals: QuerySignals::default(),
            request_digest: RequestDigest { summary: String::new(), refined_query: request.into(), candidate_files: Vec::new(), confidence: Confidence::High },
            project_info: ProjectInfo::default(),
            warnings: Vec::new(),
            missing: Vec::new(),
            research: None,
        }
    }

    struct FakeAssembler;
    #[async_trait]
    impl ContextAssembler for FakeAssembler {
        async fn assemble(&self, request: &str, options: AssembleOptions) -> anyhow::Result<ContextBundle> {
            let mut focus = vec!["file.ts".to_string()];
            focus.extend(options.force_focus_files.clone());
            Ok(empty_context(request, focus))
        }
        async fn run_research_tools(&self, _request: &str, _context: &ContextBundle) -> anyhow::Result<ResearchOutput> {
            Ok(ResearchOutput {
                tool_runs: vec![crate::types::ToolRun { tool: "search".into(), ok: true, error: None, skipped: false, notes: None }],
                warnings: Vec::new(),
                outputs: crate::types::ResearchOutputs {
                    search_results: vec![crate::types::SearchResult {
                        query: "q".into(),
                        hits: vec![crate::types::SearchHit { doc_id: "hit-1".into(), path: "src/a.ts".into(), score: 1.0 }],
                    }],
                    ..Default::default()
                },
            })
        }
        async fn fulfill_agent_request(&self, request: &ArAgentRequest) -> anyhow::Result<FulfillResult> {
            Ok(FulfillResult { version: "v1".into(), request_id: request.request_id.clone(), results: Vec::new(), meta: serde_json::json!({}) })
        }
    }

    struct FakeArchitect;
    #[async_trait]
    impl ArchitectPlanner for FakeArchitect {
        async fn plan(&self, context: &ContextBundle, lane_id: &str) -> anyhow::Result<ArchitectResponse> {
            self.plan_with_request(context, PlanOptions::default(), lane_id).await
        }
        async fn plan_with_request(&self, context: &ContextBundle, _opts: PlanOptions, _lane_id: &str) -> anyhow::Result<ArchitectResponse> {
            let plan = Plan {
                steps: vec!["do thing".to_string()],
                target_files: context.selection.focus.clone(),
                risk_assessment: "low".into(),
                verification: vec!["Run unit tests for file.ts".into()],
                warnings: Vec::new(),
            };
            Ok(ArchitectResponse::Plan(plan, crate::types::PlanResponseFormat::Dsl, "PLAN:...".into()))
        }
    }

    struct FakeBuilder {
        finalize: bool,
    }
    #[async_trait]
    impl BuilderRunner for FakeBuilder {
        async fn run(&self, _plan: &Plan, _context: &ContextBundle, _lane_id: &str) -> anyhow::Result<BuilderResponse> {
            if self.finalize {
                Ok(BuilderResponse::Finalize(Message { role: "builder".into(), content: "done".into() }))
            } else {
                Ok(BuilderResponse::Apply(vec![Patch {
                    action: PatchAction::Create,
                    file: "file.ts".into(),
                    search_block: None,
                    replace_block: Some("content".into()),
                }]))
            }
        }
    }

    struct FakeVcs;
    #[async_trait]
    impl VcsClient for FakeVcs {
        async fn apply(&self, patches: &[Patch]) -> Result<Vec<String>, crate::error::PatchApplyFailure> {
            Ok(patches.iter().map(|p| p.file.clone()).collect())
        }
    }

    struct FakeCritic {
        status: CriticStatus,
        retryable: bool,
    }
    #[async_trait]
    impl CriticEvaluator for FakeCritic {
        async fn evaluate(&self, _plan: &Plan, _builder_output: &BuilderRunResult, _touched_files: &[String], _lane_id: &str) -> anyhow::Result<CriticResult> {
            Ok(CriticResult { status: self.status, reasons: vec!["stop".into()], retryable: self.retryable, request: None })
        }
    }

    struct NoopMemory;
    #[async_trait]
    impl MemoryWriteback for NoopMemory {
        async fn persist(&self, _record: MemoryRecord) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopLogger;
    #[async_trait]
    impl Logger for NoopLogger {
        async fn log(&self, _event_type: &str, _data: serde_json::Value) {}
        async fn write_phase_artifact(&self, _phase: &str, _kind: &str, _payload: serde_json::Value) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    struct NoopLanes;
    #[async_trait]
    impl ContextManager for NoopLanes {
        async fn get_lane(&self, key: LaneKey) -> crate::types::Lane {
            crate::types::Lane { lane_id: key.id(), messages: Vec::new(), bytes: 0, role: key.role, ephemeral: key.ephemeral }
        }
        async fn append(&self, _lane_id: &str, _role: &str, _content: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// An architect stand-in that counts calls and records the
    /// `instruction_hint` it was invoked with, for asserting recovery passes
    /// actually happen with the right hint.
    struct CountingArchitect {
        calls: std::sync::atomic::AtomicUsize,
        hints: std::sync::Mutex<Vec<Option<String>>>,
        agent_request_once: bool,
        non_dsl_once: bool,
    }

    impl CountingArchitect {
        fn new() -> Self {
            Self {
                calls: std::sync::atomic::AtomicUsize::new(0),
                hints: std::sync::Mutex::new(Vec::new()),
                agent_request_once: false,
                non_dsl_once: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn hint_at(&self, pass: usize) -> Option<String> {
            self.hints.lock().unwrap().get(pass).cloned().flatten()
        }
    }

    #[async_trait]
    impl ArchitectPlanner for CountingArchitect {
        async fn plan(&self, context: &ContextBundle, lane_id: &str) -> anyhow::Result<ArchitectResponse> {
            self.plan_with_request(context, PlanOptions::default(), lane_id).await
        }

        async fn plan_with_request(
            &self,
            context: &ContextBundle,
            opts: PlanOptions,
            _lane_id: &str,
        ) -> anyhow::Result<ArchitectResponse> {
            let call_index = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.hints.lock().unwrap().push(opts.instruction_hint.clone());

            if self.agent_request_once && call_index == 0 {
                return Ok(ArchitectResponse::AgentRequest(ArAgentRequest {
                    request_id: "req-1".into(),
                    needs: vec!["docdex.search".into()],
                }));
            }
            if self.non_dsl_once && call_index == 0 {
                let plan = Plan {
                    steps: vec!["do thing".into()],
                    target_files: context.selection.focus.clone(),
                    risk_assessment: "low".into(),
                    verification: vec!["Run unit tests for file.ts".into()],
                    warnings: vec!["architect_output_unstructured_plaintext".into()],
                };
                return Ok(ArchitectResponse::Plan(plan, crate::types::PlanResponseFormat::Prose, "prose blob".into()));
            }

            let plan = Plan {
                steps: vec!["do thing".into()],
                target_files: context.selection.focus.clone(),
                risk_assessment: "low".into(),
                verification: vec!["Run unit tests for file.ts".into()],
                warnings: Vec::new(),
            };
            Ok(ArchitectResponse::Plan(plan, crate::types::PlanResponseFormat::Dsl, "PLAN:...".into()))
        }
    }

    /// A builder that raises `NeedsContext` exactly once, then finalizes.
    struct NeedsContextOnceBuilder {
        asked: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl BuilderRunner for NeedsContextOnceBuilder {
        async fn run(&self, _plan: &Plan, _context: &ContextBundle, _lane_id: &str) -> anyhow::Result<BuilderResponse> {
            if !self.asked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                Ok(BuilderResponse::NeedsContext(ContextRequest { queries: vec!["q".into()], files: vec!["file.ts".into()] }))
            } else {
                Ok(BuilderResponse::Finalize(Message { role: "builder".into(), content: "done".into() }))
            }
        }
    }

    /// A VCS that fails deterministically (`ENOENT`) on the first apply, then
    /// succeeds.
    struct FailOnceVcs {
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl VcsClient for FailOnceVcs {
        async fn apply(&self, patches: &[Patch]) -> Result<Vec<String>, crate::error::PatchApplyFailure> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                Err(crate::error::PatchApplyFailure {
                    source_label: crate::error::PatchApplySource::InterpreterPrimary,
                    error: "ENOENT: no such file".into(),
                    patches: patches.to_vec(),
                    rollback_attempted: true,
                    rollback_ok: true,
                    raw_output: None,
                })
            } else {
                Ok(patches.iter().map(|p| p.file.clone()).collect())
            }
        }
    }

    fn scope() -> LaneScope {
        LaneScope { job_id: "job-x".into(), task_id: "task-y".into(), run_id: None }
    }

    fn pipeline(finalize: bool, critic_status: CriticStatus, retryable: bool, max_retries: usize) -> SmartPipeline {
        let collab = Collaborators {
            assembler: Arc::new(FakeAssembler),
            architect: Arc::new(FakeArchitect),
            builder: Arc::new(FakeBuilder { finalize }),
            vcs: Arc::new(FakeVcs),
            critic: Arc::new(FakeCritic { status: critic_status, retryable }),
            memory: Arc::new(NoopMemory),
            logger: Arc::new(NoopLogger),
            lanes: Arc::new(NoopLanes),
            on_provider_failure: Arc::new(crate::collab::NeverSwitch),
        };
        let mut config = PipelineConfig::default();
        config.max_retries = max_retries.max(1);
        config.max_context_refreshes = 1;
        SmartPipeline::new(collab, config, scope())
    }

    #[tokio::test]
    async fn simple_pass_scenario() {
        let pipeline = pipeline(true, CriticStatus::Pass, false, 1);
        let result = pipeline.run("do thing").await.unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(result.status, RunStatus::Pass);
    }

    #[tokio::test]
    async fn non_retryable_critic_fail_stops_after_one_attempt() {
        let pipeline = pipeline(true, CriticStatus::Fail, false, 3);
        let result = pipeline.run("do thing").await.unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(result.status, RunStatus::Fail);
    }

    #[tokio::test]
    async fn lane_ids_follow_scope_convention() {
        let pipeline = pipeline(true, CriticStatus::Pass, false, 1);
        assert_eq!(pipeline.lane_id(LaneRole::Builder, None), "job-x:task-y:builder");
        assert_eq!(pipeline.lane_id(LaneRole::Builder, Some(2)), "job-x:task-y:builder:attempt-2");
    }

    #[tokio::test]
    async fn builder_needs_context_triggers_one_architect_replan() {
        let architect = Arc::new(CountingArchitect::new());
        let collab = Collaborators {
            assembler: Arc::new(FakeAssembler),
            architect: architect.clone() as Arc<dyn ArchitectPlanner>,
            builder: Arc::new(NeedsContextOnceBuilder { asked: std::sync::atomic::AtomicBool::new(false) }),
            vcs: Arc::new(FakeVcs),
            critic: Arc::new(FakeCritic { status: CriticStatus::Pass, retryable: false }),
            memory: Arc::new(NoopMemory),
            logger: Arc::new(NoopLogger),
            lanes: Arc::new(NoopLanes),
            on_provider_failure: Arc::new(crate::collab::NeverSwitch),
        };
        let mut config = PipelineConfig::default();
        config.max_retries = 1;
        config.max_context_refreshes = 1;
        let pipeline = SmartPipeline::new(collab, config, scope());

        let result = pipeline.run("do thing").await.unwrap();

        assert_eq!(result.status, RunStatus::Pass);
        assert_eq!(architect.calls(), 2);
        let hint = architect.hint_at(1).expect("second call should carry a hint");
        assert!(hint.contains("builder_needs_context"));
        assert!(hint.contains("Do not restart from scratch."));
    }

    #[tokio::test]
    async fn deterministic_patch_failure_triggers_one_architect_replan() {
        let architect = Arc::new(CountingArchitect::new());
        let collab = Collaborators {
            assembler: Arc::new(FakeAssembler),
            architect: architect.clone() as Arc<dyn ArchitectPlanner>,
            builder: Arc::new(FakeBuilder { finalize: false }),
            vcs: Arc::new(FailOnceVcs { failed: std::sync::atomic::AtomicBool::new(false) }),
            critic: Arc::new(FakeCritic { status: CriticStatus::Pass, retryable: false }),
            memory: Arc::new(NoopMemory),
            logger: Arc::new(NoopLogger),
            lanes: Arc::new(NoopLanes),
            on_provider_failure: Arc::new(crate::collab::NeverSwitch),
        };
        let mut config = PipelineConfig::default();
        config.max_retries = 1;
        config.max_context_refreshes = 1;
        let pipeline = SmartPipeline::new(collab, config, scope());

        let result = pipeline.run("do thing").await.unwrap();

        assert_eq!(result.status, RunStatus::Pass);
        assert_eq!(architect.calls(), 2);
        let hint = architect.hint_at(1).expect("second call should carry a hint");
        assert!(hint.contains("builder_repair"));
        assert!(hint.contains("enoent"));
    }

    #[tokio::test]
    async fn agent_request_recovery_carries_revision_hint() {
        let architect = Arc::new({
            let mut a = CountingArchitect::new();
            a.agent_request_once = true;
            a
        });
        let pipeline_instance = {
            let collab = Collaborators {
                assembler: Arc::new(FakeAssembler),
                architect: architect.clone() as Arc<dyn ArchitectPlanner>,
                builder: Arc::new(FakeBuilder { finalize: true }),
                vcs: Arc::new(FakeVcs),
                critic: Arc::new(FakeCritic { status: CriticStatus::Pass, retryable: false }),
                memory: Arc::new(NoopMemory),
                logger: Arc::new(NoopLogger),
                lanes: Arc::new(NoopLanes),
                on_provider_failure: Arc::new(crate::collab::NeverSwitch),
            };
            let mut config = PipelineConfig::default();
            config.max_retries = 1;
            config.max_context_refreshes = 1;
            SmartPipeline::new(collab, config, scope())
        };

        let mut context = empty_context("do thing", vec!["file.ts".into()]);
        let plan = pipeline_instance.run_architect_loop("do thing", &mut context).await.unwrap();

        assert_eq!(architect.calls(), 2);
        assert!(!plan.target_files.is_empty());
        let hint = architect.hint_at(1).expect("second call should carry a hint");
        assert!(hint.contains("REVISION REQUIRED"));
        assert!(hint.contains("architect_request_recovery"));
    }

    #[tokio::test]
    async fn non_dsl_retry_carries_dsl_format_hint() {
        let architect = Arc::new({
            let mut a = CountingArchitect::new();
            a.non_dsl_once = true;
            a
        });
        let pipeline_instance = {
            let collab = Collaborators {
                assembler: Arc::new(FakeAssembler),
                architect: architect.clone() as Arc<dyn ArchitectPlanner>,
                builder: Arc::new(FakeBuilder { finalize: true }),
                vcs: Arc::new(FakeVcs),
                critic: Arc::new(FakeCritic { status: CriticStatus::Pass, retryable: false }),
                memory: Arc::new(NoopMemory),
                logger: Arc::new(NoopLogger),
                lanes: Arc::new(NoopLanes),
                on_provider_failure: Arc::new(crate::collab::NeverSwitch),
            };
            let mut config = PipelineConfig::default();
            config.max_retries = 1;
            config.max_context_refreshes = 1;
            SmartPipeline::new(collab, config, scope())
        };

        let mut context = empty_context("do thing", vec!["file.ts".into()]);
        let plan = pipeline_instance.run_architect_loop("do thing", &mut context).await.unwrap();

        assert_eq!(architect.calls(), 2);
        assert!(!plan.target_files.is_empty());
        let hint = architect.hint_at(1).expect("second call should carry a hint");
        assert!(hint.contains("Revise your previous response in place"));
    }

    #[tokio::test]
    async fn deep_mode_quota_checks_symbols_impact_and_dag_export() {
        struct PartialUsageAssembler;
        #[async_trait]
        impl ContextAssembler for PartialUsageAssembler {
            async fn assemble(&self, request: &str, _options: AssembleOptions) -> anyhow::Result<ContextBundle> {
                Ok(empty_context(request, vec!["file.ts".into()]))
            }
            async fn run_research_tools(&self, _request: &str, _context: &ContextBundle) -> anyhow::Result<ResearchOutput> {
                Ok(ResearchOutput {
                    tool_runs: vec![
                        crate::types::ToolRun { tool: "search".into(), ok: true, error: None, skipped: false, notes: None },
                        crate::types::ToolRun { tool: "tree".into(), ok: true, error: None, skipped: false, notes: None },
                        crate::types::ToolRun { tool: "open_snippet".into(), ok: true, error: None, skipped: false, notes: None },
                    ],
                    warnings: Vec::new(),
                    outputs: crate::types::ResearchOutputs {
                        search_results: vec![crate::types::SearchResult {
                            query: "q".into(),
                            hits: vec![crate::types::SearchHit { doc_id: "1".into(), path: "src/a.ts".into(), score: 1.0 }],
                        }],
                        ..Default::default()
                    },
                })
            }
            async fn fulfill_agent_request(&self, request: &ArAgentRequest) -> anyhow::Result<FulfillResult> {
                Ok(FulfillResult { version: "v1".into(), request_id: request.request_id.clone(), results: Vec::new(), meta: serde_json::json!({}) })
            }
        }

        let collab = Collaborators {
            assembler: Arc::new(PartialUsageAssembler),
            architect: Arc::new(FakeArchitect),
            builder: Arc::new(FakeBuilder { finalize: true }),
            vcs: Arc::new(FakeVcs),
            critic: Arc::new(FakeCritic { status: CriticStatus::Pass, retryable: false }),
            memory: Arc::new(NoopMemory),
            logger: Arc::new(NoopLogger),
            lanes: Arc::new(NoopLanes),
            on_provider_failure: Arc::new(crate::collab::NeverSwitch),
        };
        let mut config = PipelineConfig::default();
        config.max_retries = 1;
        config.max_context_refreshes = 1;
        config.deep_mode = true;
        config.deep_investigation.investigation_budget.max_cycles = 1;
        config.deep_investigation.investigation_budget.min_cycles = 1;
        let pipeline = SmartPipeline::new(collab, config, scope());

        let result = pipeline.run("do thing").await;

        assert!(
            matches!(result, Err(OrchestratorError::DeepInvestigationQuotaUnmet { .. })),
            "symbols_or_ast/impact quota must be enforced even though search/tree/open_snippet are satisfied"
        );
    }
}
