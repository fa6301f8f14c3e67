//! Candidate/job scoring seam.
//!
//! Implementations may be local and deterministic ([`KeywordScorer`]) or backed by a remote
//! classifier ([`crate::workflows::screening::AiBackendClient`]). Callers treat every scorer as
//! fallible and slow.

mod keyword;

pub use keyword::KeywordScorer;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{CandidateProfile, Confidence, Job};

/// Output of a scorer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u8,
    pub confidence: Confidence,
}

impl ScoreResult {
    /// Builds a result, clamping the score into 0..=100.
    pub fn new(score: u32, confidence: Confidence) -> Self {
        Self {
            score: score.min(100) as u8,
            confidence,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring unavailable: {0}")]
    ScoringUnavailable(String),
    #[error("scoring timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(
        &self,
        candidate: &CandidateProfile,
        job: &Job,
    ) -> Result<ScoreResult, ScoringError>;

    /// Short backend label recorded in audit notes.
    fn backend(&self) -> &'static str;
}
