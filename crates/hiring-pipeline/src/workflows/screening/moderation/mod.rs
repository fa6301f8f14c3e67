//! Message moderation seam.

mod rules;

pub use rules::{PhraseRule, PhraseRuleFlagger};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Classifier output for a single piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub flagged: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn clean() -> Self {
        Self {
            flagged: false,
            reason: None,
        }
    }

    pub fn flagged(reason: impl Into<String>) -> Self {
        Self {
            flagged: true,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassificationError {
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),
    #[error("classification timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait Flagger: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Verdict, ClassificationError>;

    fn backend(&self) -> &'static str;
}
