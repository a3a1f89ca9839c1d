//! `orc` — command-line entry point for the agentic code-change
//! orchestrator. Wires the reference collaborators (TF-IDF index, file-
//! backed memory/logger, filesystem VCS, synthetic architect/builder/critic)
//! into [`SmartPipeline::run`].

mod agents;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orc_core::collab::NeverSwitch;
use orc_core::context_assembler::{BudgetConfig, DefaultContextAssembler};
use orc_core::lanes::{InMemoryLaneManager, LaneLimits};
use orc_core::logger::FileLogger;
use orc_core::memory::FileMemoryWriteback;
use orc_core::pipeline::{Collaborators, SmartPipeline};
use orc_core::types::LaneScope;
use orc_core::vcs::FilesystemVcs;
use orc_index::TfIdfIndex;

#[derive(Parser)]
#[command(name = "orc", about = "Agentic code-change orchestrator", version)]
struct Cli {
    /// Workspace root to operate on (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against a natural-language request.
    Run {
        request: String,
        /// Enable deep-mode research cycles before planning.
        #[arg(long)]
        deep: bool,
        /// Maximum builder→critic retry attempts.
        #[arg(long, default_value_t = 1)]
        max_retries: usize,
        /// Treat the request as eligible for the fast path (skips architect).
        #[arg(long)]
        fast_path: bool,
    },
    /// List phase-artifact directories written by prior runs.
    Plans,
    /// Dump current lane contents for debugging.
    Lanes { job_id: String, task_id: String },
}

fn data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("orc")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "orc=info".into()))
        .init();

    let cli = Cli::parse();
    let workspace = cli.workspace.clone().unwrap_or_else(|| std::env::current_dir().expect("cwd"));

    match cli.command {
        Commands::Run { request, deep, max_retries, fast_path } => run_request(&workspace, &request, deep, max_retries, fast_path).await,
        Commands::Plans => list_plans(&workspace),
        Commands::Lanes { job_id, task_id } => dump_lanes(&job_id, &task_id),
    }
}

async fn run_request(workspace: &PathBuf, request: &str, deep: bool, max_retries: usize, fast_path: bool) -> Result<()> {
    let mut config = orc_config::load(workspace).context("loading configuration")?;
    config.max_retries = max_retries.max(1);
    config.deep_mode = deep;
    if fast_path {
        config.fast_path = orc_config::FastPathPolicy::Always;
    }

    let index = Arc::new(TfIdfIndex::build(workspace).context("building workspace index")?);
    let budget = BudgetConfig { deep_mode: deep, ..BudgetConfig::default() };
    let assembler = Arc::new(DefaultContextAssembler::new(
        index,
        budget,
        workspace.to_string_lossy().into_owned(),
    ));

    let job_id = uuid::Uuid::new_v4().to_string();
    let data_dir = data_dir();
    let logger = Arc::new(FileLogger::new(&data_dir, &job_id));
    let memory = Arc::new(FileMemoryWriteback::new(data_dir.join("memory"), &workspace.to_string_lossy()));
    let lanes = InMemoryLaneManager::shared(LaneLimits {
        max_messages: config.lane.max_messages,
        max_bytes_per_lane: config.lane.max_bytes_per_lane,
        summarize_enabled: config.lane.summarize_enabled,
        summarize_threshold_pct: config.lane.summarize_threshold_pct,
    });
    let vcs = Arc::new(FilesystemVcs::new(workspace));

    let collab = Collaborators {
        assembler,
        architect: Arc::new(agents::SyntheticArchitect),
        builder: Arc::new(agents::SyntheticBuilder),
        vcs,
        critic: Arc::new(agents::SyntheticCritic),
        memory,
        logger,
        lanes,
        on_provider_failure: Arc::new(NeverSwitch),
    };

    let lane_scope = LaneScope { job_id: job_id.clone(), task_id: "cli".to_string(), run_id: None };
    let pipeline = SmartPipeline::new(collab, config, lane_scope);

    let result = pipeline.run(request).await.map_err(|e| anyhow::anyhow!(e))?;
    println!("status: {:?}", result.status);
    println!("attempts: {}", result.attempts);
    if let Some(plan) = &result.plan {
        println!("plan targets: {}", plan.target_files.join(", "));
    }
    Ok(())
}

fn list_plans(workspace: &PathBuf) -> Result<()> {
    let jobs_dir = data_dir().join("jobs");
    if !jobs_dir.exists() {
        println!("no runs recorded yet for {}", workspace.display());
        return Ok(());
    }
    for entry in std::fs::read_dir(&jobs_dir)? {
        let entry = entry?;
        println!("{}", entry.file_name().to_string_lossy());
    }
    Ok(())
}

fn dump_lanes(job_id: &str, task_id: &str) -> Result<()> {
    println!("lane inspection for job={job_id} task={task_id} is only available within a live run");
    Ok(())
}
