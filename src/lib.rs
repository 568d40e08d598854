//! DropCoach analysis pipeline.
//!
//! Turns a user's recent journal drops and coach conversations into one
//! synthesized analysis: eligibility gate, history compile, prompt,
//! generation under retry/timeout/rate-limit, parse, atomic commit.

pub mod analysis;
pub mod db;
pub mod error;
pub mod generation;
mod migrations;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use analysis::{AnalysisOrchestrator, InFlightUsers, PipelineStage, MIN_ENTRIES_FOR_ANALYSIS};
pub use error::{AnalysisError, AnalysisFailure, ErrorKind};
pub use generation::{
    GenerationClient, GenerationError, GenerationPolicy, GenerationService, RateLimiter,
    RetryPolicy, ServiceError,
};
pub use state::{load_config, AnalysisConfig, AppState};
pub use store::{AnalysisStore, SqliteStore, StoreError};
