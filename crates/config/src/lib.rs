//! Configuration loading and merging for the orchestrator (spec.md §4.1
//! "Configuration"), following the teacher's global/project merge idiom:
//! `serde`-derived structs with `#[serde(default)]`, `toml` on disk,
//! project values winning over global ones.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Bounds on deep-mode research cycles (spec.md §4.1 `deepInvestigation`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolQuotaConfig {
    pub search: usize,
    pub open_or_snippet: usize,
    pub symbols_or_ast: usize,
    pub impact: usize,
    pub tree: usize,
    pub dag_export: usize,
}

impl Default for ToolQuotaConfig {
    fn default() -> Self {
        Self { search: 1, open_or_snippet: 1, symbols_or_ast: 1, impact: 1, tree: 1, dag_export: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvestigationBudgetConfig {
    pub min_cycles: usize,
    pub min_seconds: u64,
    pub max_cycles: usize,
}

impl Default for InvestigationBudgetConfig {
    fn default() -> Self {
        Self { min_cycles: 1, min_seconds: 0, max_cycles: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceGateConfig {
    pub min_search_hits: usize,
    pub min_open_or_snippet: usize,
    pub min_symbols_or_ast: usize,
    pub min_impact: usize,
    pub max_warnings: usize,
}

impl Default for EvidenceGateConfig {
    fn default() -> Self {
        Self { min_search_hits: 1, min_open_or_snippet: 0, min_symbols_or_ast: 0, min_impact: 0, max_warnings: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeepInvestigationConfig {
    pub tool_quota: ToolQuotaConfig,
    pub investigation_budget: InvestigationBudgetConfig,
    pub evidence_gate: EvidenceGateConfig,
}

/// `fastPath(request) -> bool` modeled as a static policy, since configs are
/// data, not closures (spec.md §4.1 `fastPath`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FastPathPolicy {
    #[default]
    Never,
    Always,
    KeywordMatch(Vec<String>),
}

impl FastPathPolicy {
    pub fn evaluate(&self, request: &str) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::KeywordMatch(keywords) => {
                let lower = request.to_lowercase();
                keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
            }
        }
    }
}

/// Per-lane byte/message caps (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub max_messages: usize,
    pub max_bytes_per_lane: usize,
    pub summarize_enabled: bool,
    pub summarize_threshold_pct: f64,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self { max_messages: 200, max_bytes_per_lane: 200_000, summarize_enabled: true, summarize_threshold_pct: 0.9 }
    }
}

/// Top-level pipeline configuration (spec.md §4.1 "Configuration").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_retries: usize,
    pub max_context_refreshes: usize,
    pub fast_path: FastPathPolicy,
    pub deep_mode: bool,
    pub deep_investigation: DeepInvestigationConfig,
    pub lane: LaneConfig,
}

impl PipelineConfig {
    /// Merge `project` over `self` (global): any non-default project field
    /// wins, matching the teacher's `Config::merge` semantics.
    pub fn merge(mut self, project: PipelineConfig) -> Self {
        if project.max_retries != 0 {
            self.max_retries = project.max_retries;
        }
        if project.max_context_refreshes != 0 {
            self.max_context_refreshes = project.max_context_refreshes;
        }
        if project.fast_path != FastPathPolicy::default() {
            self.fast_path = project.fast_path;
        }
        if project.deep_mode {
            self.deep_mode = true;
        }
        self.deep_investigation = project.deep_investigation;
        self.lane = project.lane;
        self
    }
}

impl PipelineConfigDefaults for PipelineConfig {
    fn with_sane_defaults() -> Self {
        Self {
            max_retries: 1,
            max_context_refreshes: 1,
            fast_path: FastPathPolicy::Never,
            deep_mode: false,
            deep_investigation: DeepInvestigationConfig::default(),
            lane: LaneConfig::default(),
        }
    }
}

pub trait PipelineConfigDefaults {
    fn with_sane_defaults() -> Self;
}

/// Global config path: `~/.config/orc/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("orc").join("config.toml"))
}

/// Project config path: `<root>/.orc/config.toml`.
pub fn project_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".orc").join("config.toml")
}

fn load_toml(path: &Path) -> Result<PipelineConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Load and merge global + project config, falling back to sane defaults
/// when neither file exists.
pub fn load(workspace_root: &Path) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::with_sane_defaults();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            config = load_toml(&global_path)?;
        }
    }

    let project_path = project_config_path(workspace_root);
    if project_path.exists() {
        let project = load_toml(&project_path)?;
        config = config.merge(project);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fast_path_keyword_match() {
        let policy = FastPathPolicy::KeywordMatch(vec!["typo".to_string()]);
        assert!(policy.evaluate("fix a typo in the readme"));
        assert!(!policy.evaluate("implement a new feature"));
    }

    #[test]
    fn project_overrides_global_max_retries() {
        let global = PipelineConfig { max_retries: 1, ..PipelineConfig::with_sane_defaults() };
        let project = PipelineConfig { max_retries: 5, ..Default::default() };
        let merged = global.merge(project);
        assert_eq!(merged.max_retries, 5);
    }

    #[test]
    fn load_falls_back_to_defaults_when_no_files_present() {
        let dir = tempdir().unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn load_reads_project_config_toml() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".orc")).unwrap();
        std::fs::write(
            dir.path().join(".orc/config.toml"),
            "max_retries = 3\ndeep_mode = true\n",
        )
        .unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.max_retries, 3);
        assert!(config.deep_mode);
    }
}
