use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    Application, ApplicationId, Confidence, Job, JobId, JobStatus, Message, Stage, Thread,
    ThreadId,
};
use super::risk::RiskLevel;

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub title: String,
    pub status: JobStatus,
    pub status_label: &'static str,
    pub risk_level: RiskLevel,
    pub risk_label: &'static str,
    pub recruiter: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            title: job.title.clone(),
            status: job.status,
            status_label: job.status.label(),
            risk_level: job.risk_level,
            risk_label: job.risk_level.label(),
            recruiter: job.recruiter.clone(),
            created_at: job.created_at,
        }
    }
}

/// Recruiter-facing summary of an application. Candidate contact details stay out of it.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationView {
    pub application_id: ApplicationId,
    pub job_id: JobId,
    pub candidate_name: String,
    pub stage: Stage,
    pub stage_label: &'static str,
    pub score: u8,
    pub confidence: Confidence,
    pub overridden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl From<&Application> for ApplicationView {
    fn from(application: &Application) -> Self {
        Self {
            application_id: application.id.clone(),
            job_id: application.job_id.clone(),
            candidate_name: application.candidate.name.clone(),
            stage: application.stage,
            stage_label: application.stage.label(),
            score: application.score,
            confidence: application.confidence,
            overridden: application.is_overridden(),
            override_reason: application.override_reason().map(str::to_string),
            submitted_at: application.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub thread_id: ThreadId,
    pub job_id: JobId,
    pub application_id: ApplicationId,
    pub unread: u32,
    pub flagged: usize,
    pub messages: Vec<Message>,
}

impl From<&Thread> for ThreadView {
    fn from(thread: &Thread) -> Self {
        Self {
            thread_id: thread.id.clone(),
            job_id: thread.job_id.clone(),
            application_id: thread.application_id.clone(),
            unread: thread.unread,
            flagged: thread.flagged_count(),
            messages: thread.messages.clone(),
        }
    }
}
