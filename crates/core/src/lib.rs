//! Agentic code-change orchestrator: the Smart Pipeline state machine, the
//! Context Assembler it drives, and the Lane Context Manager that backs
//! per-phase conversation storage.

pub mod architect;
pub mod builder;
pub mod collab;
pub mod context_assembler;
pub mod error;
pub mod lanes;
pub mod logger;
pub mod memory;
pub mod pipeline;
pub mod types;
pub mod vcs;

pub use collab::{ArchitectPlanner, BuilderRunner, ContextAssembler, ContextManager, CriticEvaluator,
    IndexClient, Logger, MemoryWriteback, OnPhaseProviderFailure, VcsClient};
pub use error::OrchestratorError;
pub use pipeline::{Collaborators, SmartPipeline};
pub use types::{ContextBundle, Plan, RunResult};
