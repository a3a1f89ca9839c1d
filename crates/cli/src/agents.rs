//! Reference/test-grade stand-ins for the architect/builder/critic
//! collaborators, wired through the same trait seams a production
//! deployment would use. The raw LLM providers behind each phase agent are
//! out of scope for this workspace (spec.md §1); these implementations
//! exist only so `orc run` has something real to drive end to end.

use anyhow::Result;
use async_trait::async_trait;
use orc_core::collab::{ArchitectPlanner, BuilderRunner, CriticEvaluator, PlanOptions};
use orc_core::types::{
    ArchitectResponse, BuilderRunResult, BuilderResponse, ContextBundle, CriticResult, CriticStatus,
    Message, Plan, PlanResponseFormat,
};

/// Emits a DSL plan naming every focus file as a target, with a synthesized
/// verification step.
pub struct SyntheticArchitect;

#[async_trait]
impl ArchitectPlanner for SyntheticArchitect {
    async fn plan(&self, context: &ContextBundle, lane_id: &str) -> Result<ArchitectResponse> {
        self.plan_with_request(context, PlanOptions::default(), lane_id).await
    }

    async fn plan_with_request(
        &self,
        context: &ContextBundle,
        _opts: PlanOptions,
        _lane_id: &str,
    ) -> Result<ArchitectResponse> {
        let targets = if context.selection.focus.is_empty() {
            vec!["README.md".to_string()]
        } else {
            context.selection.focus.clone()
        };
        let raw = format!(
            "PLAN:\n- address: {}\nTARGETS: {}\nRISK: low\nVERIFY:\n- Run unit tests for {}",
            context.request,
            targets.join(", "),
            targets[0]
        );
        let plan = Plan {
            steps: vec![format!("address: {}", context.request)],
            target_files: targets.clone(),
            risk_assessment: "low".to_string(),
            verification: vec![format!("Run unit tests for {}", targets[0])],
            warnings: Vec::new(),
        };
        Ok(ArchitectResponse::Plan(plan, PlanResponseFormat::Dsl, raw))
    }
}

/// Always finalizes with a natural-language completion message; never emits
/// patches, so the demo run never mutates the workspace.
pub struct SyntheticBuilder;

#[async_trait]
impl BuilderRunner for SyntheticBuilder {
    async fn run(&self, plan: &Plan, _context: &ContextBundle, _lane_id: &str) -> Result<BuilderResponse> {
        Ok(BuilderResponse::Finalize(Message {
            role: "builder".to_string(),
            content: format!("Completed: {}", plan.steps.join("; ")),
        }))
    }
}

/// Always PASS; a stand-in critic for the CLI demo.
pub struct SyntheticCritic;

#[async_trait]
impl CriticEvaluator for SyntheticCritic {
    async fn evaluate(
        &self,
        _plan: &Plan,
        _builder_output: &BuilderRunResult,
        _touched_files: &[String],
        _lane_id: &str,
    ) -> Result<CriticResult> {
        Ok(CriticResult { status: CriticStatus::Pass, reasons: Vec::new(), retryable: false, request: None })
    }
}
