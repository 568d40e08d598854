//! Eligibility gate: does the user have enough unanalyzed entries?

use thiserror::Error;

use super::MIN_ENTRIES_FOR_ANALYSIS;
use crate::store::{AnalysisStore, StoreError};
use crate::types::AnalysisEligibility;

#[derive(Debug, Error)]
pub enum EligibilityError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Failed to read eligibility: {0}")]
    Store(StoreError),
}

/// Count entries at or after the user's watermark against the threshold.
///
/// Pure read. An unknown user is `NotFound`, which is distinct from a known
/// user with zero entries.
pub async fn evaluate_eligibility(
    store: &dyn AnalysisStore,
    user_id: &str,
) -> Result<AnalysisEligibility, EligibilityError> {
    let eligibility = store
        .get_analysis_eligibility(user_id, MIN_ENTRIES_FOR_ANALYSIS)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(id) => EligibilityError::NotFound(id),
            other => EligibilityError::Store(other),
        })?;

    // Recompute from the count so the flag can never disagree with it
    Ok(AnalysisEligibility::new(
        eligibility.unanalyzed_count,
        MIN_ENTRIES_FOR_ANALYSIS,
    ))
}
