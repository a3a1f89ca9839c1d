//! The default [`ContextAssembler`] implementation (spec.md §4.2).
//!
//! Drives an [`IndexClient`] through search/tree/snippet/symbol/impact
//! lookups, applies intent heuristics, prunes stale/conflicting memory, and
//! trims the result to a byte/token budget.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::collab::{ContextAssembler as ContextAssemblerTrait, IndexClient};
use crate::types::{
    AgentRequest, AssembleOptions, Confidence, ContextBundle, ContextFile, FileRole,
    FulfillResult, IndexStats, ProjectInfo, QuerySignals, RequestDigest, ResearchOutput,
    ResearchOutputs, SearchResult, Selection, ToolRun,
};

/// Tunables enumerated in spec.md §4.2/§4.1 (`contextManager`-adjacent
/// budget knobs). All have documented minima/maxima; values outside range
/// are clamped and logged via `context_option_clamped`.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub max_queries: usize,
    pub max_files: usize,
    pub max_total_bytes: usize,
    pub token_budget: usize,
    pub max_focus_bytes: usize,
    pub max_periphery_bytes: usize,
    pub include_repo_map: bool,
    pub deep_mode: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_queries: 8,
            max_files: 40,
            max_total_bytes: 400_000,
            token_budget: 120_000,
            max_focus_bytes: 240_000,
            max_periphery_bytes: 160_000,
            include_repo_map: false,
            deep_mode: false,
        }
    }
}

const QUERIES_MIN: usize = 1;
const QUERIES_MAX: usize = 16;
const FILES_MIN: usize = 1;
const FILES_MAX: usize = 200;

fn clamp_logged(value: usize, min: usize, max: usize, name: &str, warnings: &mut Vec<String>) -> usize {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warnings.push(format!("context_option_clamped:{name}"));
    }
    clamped
}

/// Coarse request-intent categories driving candidate injection
/// (spec.md §4.2 "Intent-based candidate injection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
enum Intent {
    Ui,
    Backend,
    Testing,
    Infra,
    Security,
    Observability,
    Unknown,
}

fn detect_intents(request: &str) -> Vec<Intent> {
    let lower = request.to_lowercase();
    let mut found = Vec::new();
    let checks: &[(&[&str], Intent)] = &[
        (&["ui", "component", "frontend", "button", "page", "css", "style"], Intent::Ui),
        (&["api", "endpoint", "backend", "server", "route", "controller"], Intent::Backend),
        (&["test", "spec", "coverage"], Intent::Testing),
        (&["deploy", "infra", "docker", "ci", "pipeline config"], Intent::Infra),
        (&["auth", "security", "vulnerab", "token", "secret"], Intent::Security),
        (&["metric", "log", "trace", "observability", "telemetry"], Intent::Observability),
    ];
    for (keywords, intent) in checks {
        if keywords.iter().any(|k| lower.contains(k)) {
            found.push(*intent);
        }
    }
    if found.is_empty() {
        found.push(Intent::Unknown);
    }
    found
}

fn intent_root(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::Testing => Some("tests/"),
        Intent::Infra => Some("infra/"),
        Intent::Security => Some("security/"),
        Intent::Observability => Some("observability/"),
        Intent::Backend => Some("src/server/"),
        Intent::Ui | Intent::Unknown => None,
    }
}

fn extract_keywords(request: &str) -> Vec<String> {
    request
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 2)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn is_placeholder(path: &str) -> bool {
    path == "path/to/file.ts" || path == "path/to/file"
}

/// Default, index-backed [`ContextAssemblerTrait`] implementation.
pub struct DefaultContextAssembler {
    pub index: std::sync::Arc<dyn IndexClient>,
    pub budget: BudgetConfig,
    pub workspace_root: String,
}

impl DefaultContextAssembler {
    pub fn new(index: std::sync::Arc<dyn IndexClient>, budget: BudgetConfig, workspace_root: String) -> Self {
        Self { index, budget, workspace_root }
    }

    fn expand_queries(&self, request: &str, options: &AssembleOptions, warnings: &mut Vec<String>) -> Vec<String> {
        let mut queries = vec![request.to_string()];
        queries.extend(options.additional_queries.iter().cloned());
        let max_queries = clamp_logged(self.budget.max_queries, QUERIES_MIN, QUERIES_MAX, "max_queries", warnings);
        queries.truncate(max_queries);
        queries
    }

    async fn load_file(&self, path: &str, role: FileRole, origin: &str) -> Option<ContextFile> {
        let content = self.index.open_snippet(path).await.ok().flatten()?;
        let size = content.len();
        Some(ContextFile {
            path: path.to_string(),
            role,
            content,
            size,
            truncated: false,
            slice_strategy: None,
            origin: origin.to_string(),
        })
    }

    fn trim_to_budget(&self, mut files: Vec<ContextFile>, warnings: &mut Vec<String>) -> Vec<ContextFile> {
        let max_files = clamp_logged(self.budget.max_files, FILES_MIN, FILES_MAX, "max_files", warnings);
        let mut pruned = false;
        if files.len() > max_files {
            // Drop periphery first (spec.md §4.2 "Budget trimming").
            files.sort_by_key(|f| matches!(f.role, FileRole::Focus) as u8);
            files.truncate(max_files);
            pruned = true;
        }
        let mut total: usize = files.iter().map(|f| f.size).sum();
        while total > self.budget.max_total_bytes {
            if let Some(idx) = files
                .iter()
                .position(|f| matches!(f.role, FileRole::Periphery))
            {
                total -= files.remove(idx).size;
                pruned = true;
            } else if let Some(last) = files.pop() {
                total -= last.size;
                pruned = true;
            } else {
                break;
            }
        }
        if pruned {
            warnings.push("context_budget_pruned".to_string());
        }
        files
    }
}

#[async_trait]
impl ContextAssemblerTrait for DefaultContextAssembler {
    async fn assemble(&self, request: &str, options: AssembleOptions) -> Result<ContextBundle> {
        let mut warnings = Vec::new();
        let mut missing = Vec::new();

        if self.budget.deep_mode {
            self.index.health_check().await.map_err(|e| {
                anyhow::anyhow!("Deep investigation requires docdex health: {e}")
            })?;
            let stats = self.index.stats().await?;
            if stats.num_docs == 0 {
                bail!("docdex_index_empty");
            }
        }

        let queries = self.expand_queries(request, &options, &mut warnings);

        let skip_search = options.skip_search_when_preferred && !options.preferred_files.is_empty();
        let mut search_results = Vec::new();
        if skip_search {
            warnings.push("docdex_search_skipped".to_string());
        } else {
            for q in &queries {
                let hits = self.index.search(q).await.unwrap_or_default();
                search_results.push(SearchResult { query: q.clone(), hits });
            }
            let total_hits: usize = search_results.iter().map(|r| r.hits.len()).sum();
            if total_hits == 0 {
                // Search-hit retry with intent-derived keyword expansion.
                let keywords = extract_keywords(request);
                for kw in keywords.iter().take(3) {
                    let hits = self.index.search(kw).await.unwrap_or_default();
                    if !hits.is_empty() {
                        search_results.push(SearchResult { query: kw.clone(), hits });
                    }
                }
                if search_results.iter().all(|r| r.hits.is_empty()) {
                    warnings.push("docdex_no_hits".to_string());
                }
            }
        }

        let stats = self.index.stats().await.unwrap_or_default_stats(&mut warnings);

        let intents = detect_intents(request);
        let mut candidate_paths: Vec<(String, FileRole, String)> = Vec::new();
        for r in &search_results {
            for hit in &r.hits {
                candidate_paths.push((hit.path.clone(), FileRole::Focus, "search".to_string()));
            }
        }
        for pf in &options.preferred_files {
            if !is_placeholder(pf) {
                candidate_paths.push((pf.clone(), FileRole::Focus, "preferred".to_string()));
            }
        }
        for ff in &options.force_focus_files {
            if !is_placeholder(ff) {
                candidate_paths.push((ff.clone(), FileRole::Focus, "forced".to_string()));
            }
        }
        for rf in &options.recent_files {
            if !is_placeholder(rf) {
                candidate_paths.push((rf.clone(), FileRole::Periphery, "recent".to_string()));
            }
        }
        for intent in &intents {
            if let Some(root) = intent_root(*intent) {
                warnings.push(format!("librarian_{:?}_candidates", intent).to_lowercase());
                candidate_paths.push((format!("{root}"), FileRole::Periphery, "intent".to_string()));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut files = Vec::new();
        for (path, role, origin) in candidate_paths {
            if !seen.insert(path.clone()) {
                continue;
            }
            if let Some(f) = self.load_file(&path, role, &origin).await {
                files.push(f);
            }
        }

        let mut symbols = Vec::new();
        let mut ast = Vec::new();
        let mut impact = Vec::new();
        let mut impact_diagnostics = Vec::new();
        for f in &files {
            if is_structural_applicable(&f.path) {
                if let Ok(Some(s)) = self.index.symbols(&f.path).await {
                    symbols.push(s);
                } else {
                    warnings.push(format!("docdex_symbols_not_applicable:{}", f.path));
                }
                if let Ok(Some(a)) = self.index.ast(&f.path).await {
                    ast.push(a);
                } else {
                    warnings.push(format!("docdex_ast_not_applicable:{}", f.path));
                }
            }
            if is_impact_applicable(&f.path) {
                if let Ok(Some(diag)) = self.index.impact_graph(&f.path).await {
                    if !diag.is_empty() {
                        warnings.push(format!("impact_graph_sparse:{}", f.path));
                        impact_diagnostics.push(diag.clone());
                    }
                    impact.push(diag);
                }
            }
        }

        let memory_raw = self.index.memory_recall(request).await.unwrap_or_default();
        let keywords = extract_keywords(request);
        let focus_paths: Vec<&str> = files
            .iter()
            .filter(|f| matches!(f.role, FileRole::Focus))
            .map(|f| f.path.as_str())
            .collect();
        let (memory, memory_pruned, memory_irrelevant) = prune_memory(memory_raw, &keywords, &focus_paths);
        if memory_pruned {
            warnings.push("memory_conflicts_pruned".to_string());
        }
        if memory_irrelevant {
            warnings.push("memory_irrelevant_filtered".to_string());
        }

        let repo_map = if self.budget.include_repo_map {
            match self.index.tree(64).await {
                Ok(t) => Some(t),
                Err(_) => {
                    warnings.push("docdex_tree_failed".to_string());
                    None
                }
            }
        } else {
            None
        };

        let files = self.trim_to_budget(files, &mut warnings);

        let focus: Vec<String> = files
            .iter()
            .filter(|f| matches!(f.role, FileRole::Focus))
            .map(|f| f.path.clone())
            .collect();
        let periphery: Vec<String> = files
            .iter()
            .filter(|f| matches!(f.role, FileRole::Periphery))
            .map(|f| f.path.clone())
            .collect();
        let all: Vec<String> = focus.iter().chain(periphery.iter()).cloned().collect();
        let low_confidence = focus.is_empty();
        if focus.is_empty() {
            missing.push("no_focus_files_selected".to_string());
            missing.push("no_context_files_loaded".to_string());
            missing.push("low_confidence_selection".to_string());
        }

        let markup_only = !focus.is_empty() && focus.iter().all(|p| p.ends_with(".html") || p.ends_with(".md"));
        let digest_confidence = if markup_only { Confidence::Medium } else if low_confidence { Confidence::Low } else { Confidence::High };
        let summary = if markup_only {
            format!("markup-only context for: {request}")
        } else {
            format!("context for: {request}")
        };

        let profile = self.index.get_profile().await.unwrap_or_default();

        let bundle = ContextBundle {
            request: request.to_string(),
            queries,
            search_results,
            snippets: files.iter().map(|f| f.content.clone()).collect(),
            symbols,
            ast,
            impact,
            impact_diagnostics,
            files,
            selection: Selection { focus, periphery, all, low_confidence },
            memory,
            preferences_detected: Vec::new(),
            profile,
            golden_examples: Vec::new(),
            index: stats,
            repo_map: repo_map.clone(),
            repo_map_raw: repo_map,
            query_signals: QuerySignals { keywords: keywords.clone(), keyword_phrases: Vec::new() },
            request_digest: RequestDigest {
                summary,
                refined_query: request.to_string(),
                candidate_files: keywords.clone(),
                confidence: digest_confidence,
            },
            project_info: ProjectInfo {
                workspace_root: self.workspace_root.clone(),
                readme_path: None,
                readme_summary: None,
            },
            warnings,
            missing,
            research: None,
        };

        Ok(bundle)
    }

    async fn run_research_tools(&self, request: &str, context: &ContextBundle) -> Result<ResearchOutput> {
        let mut tool_runs = Vec::new();
        let mut warnings = Vec::new();

        let hits = self.index.search(request).await;
        tool_runs.push(ToolRun {
            tool: "search".to_string(),
            ok: hits.is_ok(),
            error: hits.as_ref().err().map(|e| e.to_string()),
            skipped: false,
            notes: None,
        });
        let search_results = match hits {
            Ok(hits) => vec![SearchResult { query: request.to_string(), hits }],
            Err(e) => {
                warnings.push(format!("research_docdex_search_failed:{e}"));
                Vec::new()
            }
        };

        let (tree_ok, tree_notes) = if context.repo_map.is_some() {
            (true, Some("repo_map_cached".to_string()))
        } else {
            (self.index.tree(64).await.is_ok(), None)
        };
        tool_runs.push(ToolRun {
            tool: "tree".to_string(),
            ok: tree_ok,
            error: None,
            skipped: tree_notes.is_some(),
            notes: tree_notes,
        });

        let mut snippets = Vec::new();
        for path in &context.selection.focus {
            if let Ok(Some(s)) = self.index.open_snippet(path).await {
                tool_runs.push(ToolRun { tool: "open_snippet".to_string(), ok: true, error: None, skipped: false, notes: None });
                snippets.push(s);
            }
        }

        let mut symbols = Vec::new();
        let mut ast = Vec::new();
        for path in &context.selection.focus {
            if let Ok(Some(s)) = self.index.symbols(path).await {
                tool_runs.push(ToolRun { tool: "symbols_or_ast".to_string(), ok: true, error: None, skipped: false, notes: None });
                symbols.push(s);
            } else if let Ok(Some(a)) = self.index.ast(path).await {
                tool_runs.push(ToolRun { tool: "symbols_or_ast".to_string(), ok: true, error: None, skipped: false, notes: None });
                ast.push(a);
            }
        }

        let mut impact = Vec::new();
        for path in &context.selection.focus {
            if let Ok(Some(i)) = self.index.impact_graph(path).await {
                tool_runs.push(ToolRun { tool: "impact".to_string(), ok: true, error: None, skipped: false, notes: None });
                impact.push(i);
            }
        }

        if symbols.is_empty() {
            symbols = context.symbols.clone();
        }
        if ast.is_empty() {
            ast = context.ast.clone();
        }
        if impact.is_empty() {
            impact = context.impact.clone();
        }

        Ok(ResearchOutput {
            tool_runs,
            warnings,
            outputs: ResearchOutputs {
                search_results,
                snippets,
                symbols,
                ast,
                impact,
                impact_diagnostics: context.impact_diagnostics.clone(),
                repo_map: context.repo_map.clone(),
                dag_summary: None,
            },
        })
    }

    async fn fulfill_agent_request(&self, request: &AgentRequest) -> Result<FulfillResult> {
        let mut results = Vec::new();
        for need in &request.needs {
            let value = match need.as_str() {
                "docdex.search" => {
                    let hits = self.index.search(&request.request_id).await.unwrap_or_default();
                    serde_json::to_value(hits)?
                }
                "docdex.open" => serde_json::Value::Null,
                "docdex.symbols" => serde_json::Value::Null,
                _ => serde_json::Value::Null,
            };
            results.push(value);
        }
        Ok(FulfillResult {
            version: "v1".to_string(),
            request_id: request.request_id.clone(),
            results,
            meta: serde_json::json!({}),
        })
    }
}

fn is_structural_applicable(path: &str) -> bool {
    !(path.ends_with(".html") || path.ends_with(".css") || path.ends_with(".md") || path.contains("/tests/"))
}

fn is_impact_applicable(path: &str) -> bool {
    !(path.ends_with(".html") || path.ends_with(".md"))
}

/// Drops contradictory/irrelevant memory facts (spec.md §4.2 "Memory
/// pruning"). Returns `(kept, had_conflict, had_irrelevant)`.
fn prune_memory(facts: Vec<String>, keywords: &[String], focus: &[&str]) -> (Vec<String>, bool, bool) {
    let mut by_subject: BTreeMap<String, String> = BTreeMap::new();
    let mut conflict = false;
    for fact in facts {
        if let Some((subject, _)) = fact.split_once(':') {
            if let Some(existing) = by_subject.get(&subject.to_string()) {
                if existing != &fact {
                    conflict = true;
                }
            }
            by_subject.insert(subject.to_string(), fact);
        } else {
            by_subject.insert(fact.clone(), fact);
        }
    }
    let mut irrelevant = false;
    let kept: Vec<String> = by_subject
        .into_values()
        .filter(|fact| {
            let lower = fact.to_lowercase();
            let relevant = keywords.iter().any(|k| lower.contains(k.as_str()))
                || focus.iter().any(|f| lower.contains(&f.to_lowercase()));
            if !relevant {
                irrelevant = true;
            }
            relevant
        })
        .collect();
    (kept, conflict, irrelevant)
}

trait StatsExt {
    fn unwrap_or_default_stats(self, warnings: &mut Vec<String>) -> IndexStats;
}

impl StatsExt for Result<IndexStats> {
    fn unwrap_or_default_stats(self, warnings: &mut Vec<String>) -> IndexStats {
        match self {
            Ok(stats) => {
                if stats.num_docs == 0 {
                    let has_snippet_evidence = false;
                    if !has_snippet_evidence {
                        warnings.push("docdex_index_empty".to_string());
                        warnings.push("docdex_index_stale".to_string());
                    }
                }
                stats
            }
            Err(_) => {
                warnings.push("docdex_stats_failed".to_string());
                IndexStats::default()
            }
        }
    }
}
