use std::collections::BTreeSet;

use async_trait::async_trait;

use super::{ScoreResult, Scorer, ScoringError};
use crate::workflows::screening::domain::{CandidateProfile, Confidence, Job};

const MIN_KEYWORD_LEN: usize = 3;
const MIN_JOB_KEYWORDS: usize = 3;
const MIN_SUMMARY_WORDS: usize = 25;

const STOPWORDS: &[&str] = &[
    "and", "the", "for", "with", "you", "our", "are", "will", "your", "who", "that", "this",
    "from", "have", "has", "not", "but", "all", "can", "their", "they", "into", "about", "must",
    "team", "role", "work", "years", "experience", "join", "looking", "new", "plus",
];

/// Deterministic scorer: the share of job keywords that appear in the candidate summary.
///
/// Confidence drops to `Low` when there is too little text on either side to trust the ratio.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn evaluate(&self, candidate: &CandidateProfile, job: &Job) -> ScoreResult {
        let job_keywords = keywords(&job.scoring_text());
        let candidate_words: Vec<String> = words(&candidate.summary).collect();
        let candidate_keywords: BTreeSet<&str> =
            candidate_words.iter().map(String::as_str).collect();

        if job_keywords.is_empty() {
            return ScoreResult::new(0, Confidence::Low);
        }

        let matched = job_keywords
            .iter()
            .filter(|keyword| candidate_keywords.contains(keyword.as_str()))
            .count();
        let score = (matched * 100 + job_keywords.len() / 2) / job_keywords.len();

        let confidence = if job_keywords.len() < MIN_JOB_KEYWORDS
            || candidate_words.len() < MIN_SUMMARY_WORDS
        {
            Confidence::Low
        } else {
            Confidence::Normal
        };

        ScoreResult::new(score as u32, confidence)
    }
}

#[async_trait]
impl Scorer for KeywordScorer {
    async fn score(
        &self,
        candidate: &CandidateProfile,
        job: &Job,
    ) -> Result<ScoreResult, ScoringError> {
        Ok(self.evaluate(candidate, job))
    }

    fn backend(&self) -> &'static str {
        "keyword"
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
}

fn keywords(text: &str) -> BTreeSet<String> {
    words(text)
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}
