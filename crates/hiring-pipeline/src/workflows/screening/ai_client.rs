//! HTTP client for the external scoring/classification backend.
//!
//! Wire protocol (JSON over HTTPS, bearer auth):
//!
//! - `POST {base}/v1/score` `{model, candidate, job}` -> `{score, confidence}`
//! - `POST {base}/v1/moderate` `{model, text}` -> `{flagged, reason}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{CandidateProfile, Confidence, Job};
use super::moderation::{ClassificationError, Flagger, Verdict};
use super::scoring::{ScoreResult, Scorer, ScoringError};
use crate::config::AiBackendConfig;

#[derive(Debug, thiserror::Error)]
pub enum AiClientError {
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("an api key is required")]
    MissingApiKey,
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    model: &'a str,
    candidate: &'a str,
    job: &'a str,
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: f64,
    confidence: Confidence,
}

#[derive(Serialize)]
struct ModerateRequest<'a> {
    model: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct AiBackendClient {
    client: Client,
    base_url: String,
    api_key: String,
    scoring_model: String,
    moderation_model: String,
    timeout: Duration,
}

impl AiBackendClient {
    pub fn from_config(config: &AiBackendConfig) -> Result<Self, AiClientError> {
        let api_key = config.api_key.clone().ok_or(AiClientError::MissingApiKey)?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AiClientError::Build)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            scoring_model: config.scoring_model.clone(),
            moderation_model: config.moderation_model.clone(),
            timeout: config.timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, AiClientError>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "calling screening backend");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl Scorer for AiBackendClient {
    async fn score(
        &self,
        candidate: &CandidateProfile,
        job: &Job,
    ) -> Result<ScoreResult, ScoringError> {
        let job_text = job.scoring_text();
        let request = ScoreRequest {
            model: &self.scoring_model,
            candidate: &candidate.summary,
            job: &job_text,
        };

        let response: ScoreResponse = self
            .post("/v1/score", &request)
            .await
            .map_err(|err| ScoringError::ScoringUnavailable(err.to_string()))?;

        if !response.score.is_finite() {
            return Err(ScoringError::ScoringUnavailable(
                "backend returned a non-numeric score".to_string(),
            ));
        }
        let score = response.score.round().clamp(0.0, 100.0) as u32;
        Ok(ScoreResult::new(score, response.confidence))
    }

    fn backend(&self) -> &'static str {
        "ai-backend"
    }
}

#[async_trait]
impl Flagger for AiBackendClient {
    async fn classify(&self, text: &str) -> Result<Verdict, ClassificationError> {
        let request = ModerateRequest {
            model: &self.moderation_model,
            text,
        };

        let verdict: Verdict = self
            .post("/v1/moderate", &request)
            .await
            .map_err(|err| ClassificationError::ClassificationUnavailable(err.to_string()))?;

        if verdict.flagged && verdict.reason.is_none() {
            return Ok(Verdict::flagged("flagged by moderation model"));
        }
        Ok(verdict)
    }

    fn backend(&self) -> &'static str {
        "ai-backend"
    }
}
