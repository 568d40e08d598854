//! Analysis generation pipeline.
//!
//! Eligibility gate → history compile → prompt → generation → parse → commit.
//! `orchestrator` drives the stages; the others are independently testable.

pub mod eligibility;
pub mod history;
pub mod orchestrator;
pub mod parser;
pub mod prompts;

pub use eligibility::{evaluate_eligibility, EligibilityError};
pub use history::{compile_history, HistoryError, IntegrityError};
pub use orchestrator::{AnalysisOrchestrator, InFlightGuard, InFlightUsers, PipelineStage};
pub use parser::parse_analysis_response;
pub use prompts::build_analysis_prompt;

/// Unanalyzed entries needed before an analysis can run. Shared by the
/// evaluator, the compiler and the orchestrator.
pub const MIN_ENTRIES_FOR_ANALYSIS: usize = 3;

/// Shortest entry text (in characters) the compiler accepts.
pub const MIN_ENTRY_TEXT_CHARS: usize = 10;
