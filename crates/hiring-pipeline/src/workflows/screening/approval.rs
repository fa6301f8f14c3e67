//! Job publication workflow.
//!
//! `Draft -> PendingApproval -> {Open | Draft (rejected)}`, then `Open -> Paused` and
//! `Open | Paused -> Closed`. A paused job goes back through `PendingApproval` with a fresh risk
//! assessment before it reopens. A job only becomes `Open` through an approval, automatic or
//! manual, and every decision is returned as an audit entry.

use serde::{Deserialize, Serialize};

use super::audit::{AuditAction, AuditChange, AuditEntry, AuditTarget};
use super::domain::{Actor, ActorRole, Job, JobStatus};
use super::policy::AutoApproval;
use super::risk::{RiskAssessment, RiskLevel};
use super::stage::TransitionError;

/// Admin decision on a pending job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum JobDecision {
    Approve {
        #[serde(default)]
        note: Option<String>,
    },
    Reject {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub job: Job,
    pub events: Vec<AuditEntry>,
}

fn subject(job: &Job) -> String {
    format!("job {}", job.id)
}

fn target(job: &Job) -> AuditTarget {
    AuditTarget::Job(job.id.clone())
}

fn risk_note(assessment: &RiskAssessment) -> String {
    format!(
        "risk {} ({} flagged message(s), {}/{} low-confidence application(s))",
        assessment.level,
        assessment.signals.flagged_messages,
        assessment.signals.low_confidence_applications,
        assessment.signals.total_applications
    )
}

pub fn submit_for_approval(
    job: &Job,
    actor: &Actor,
    assessment: &RiskAssessment,
) -> Result<JobUpdate, TransitionError> {
    let notes = match job.status {
        JobStatus::Draft => risk_note(assessment),
        JobStatus::Paused => format!("resubmitted after pause; {}", risk_note(assessment)),
        _ => {
            return Err(TransitionError::new(
                subject(job),
                job.status,
                JobStatus::PendingApproval,
                "only draft or paused jobs can be submitted for approval",
            ))
        }
    };
    if !actor.is_human() {
        return Err(TransitionError::new(
            subject(job),
            job.status,
            JobStatus::PendingApproval,
            "submission requires a recruiter or admin",
        ));
    }

    let mut updated = job.clone();
    updated.status = JobStatus::PendingApproval;
    updated.risk_level = assessment.level;

    let event = AuditEntry::new(actor.clone(), AuditAction::SubmittedForApproval, target(job))
        .notes(notes)
        .change(AuditChange::JobStatus {
            from: job.status,
            to: JobStatus::PendingApproval,
        });

    Ok(JobUpdate {
        job: updated,
        events: vec![event],
    })
}

/// System approval. `High` risk always fails, as does any level the policy does not permit.
pub fn auto_approve(
    job: &Job,
    assessment: &RiskAssessment,
    policy: AutoApproval,
) -> Result<JobUpdate, TransitionError> {
    if job.status != JobStatus::PendingApproval {
        return Err(TransitionError::new(
            subject(job),
            job.status,
            JobStatus::Open,
            "job is not pending approval",
        ));
    }
    if assessment.level == RiskLevel::High {
        return Err(TransitionError::new(
            subject(job),
            job.status,
            JobStatus::Open,
            "high risk jobs require an explicit admin decision",
        ));
    }
    if !policy.permits(assessment.level) {
        return Err(TransitionError::new(
            subject(job),
            job.status,
            JobStatus::Open,
            format!(
                "auto-approval policy '{}' does not cover {} risk",
                policy.label(),
                assessment.level
            ),
        ));
    }

    let mut updated = job.clone();
    updated.status = JobStatus::Open;
    updated.risk_level = assessment.level;

    let event = AuditEntry::new(Actor::system(), AuditAction::ApprovedJob, target(job))
        .notes(format!("auto-approved; {}", risk_note(assessment)))
        .change(AuditChange::JobStatus {
            from: JobStatus::PendingApproval,
            to: JobStatus::Open,
        });

    Ok(JobUpdate {
        job: updated,
        events: vec![event],
    })
}

/// Explicit admin decision. Rejection returns the job to `Draft`.
pub fn decide(
    job: &Job,
    decision: &JobDecision,
    actor: &Actor,
    assessment: &RiskAssessment,
) -> Result<JobUpdate, TransitionError> {
    let to = match decision {
        JobDecision::Approve { .. } => JobStatus::Open,
        JobDecision::Reject { .. } => JobStatus::Draft,
    };

    if actor.role != ActorRole::Admin {
        return Err(TransitionError::new(
            subject(job),
            job.status,
            to,
            "approval decisions require an admin",
        ));
    }
    if job.status != JobStatus::PendingApproval {
        return Err(TransitionError::new(
            subject(job),
            job.status,
            to,
            "job is not pending approval",
        ));
    }

    let mut updated = job.clone();
    updated.status = to;
    updated.risk_level = assessment.level;

    let change = AuditChange::JobStatus {
        from: JobStatus::PendingApproval,
        to,
    };
    let event = match decision {
        JobDecision::Approve { note } => {
            let mut notes = format!("approved by {}; {}", actor.id, risk_note(assessment));
            if let Some(note) = note.as_deref().map(str::trim).filter(|note| !note.is_empty()) {
                notes.push_str("; ");
                notes.push_str(note);
            }
            AuditEntry::new(actor.clone(), AuditAction::ApprovedJob, target(job)).notes(notes)
        }
        JobDecision::Reject { reason } => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(TransitionError::new(
                    subject(job),
                    job.status,
                    to,
                    "a rejection reason is required",
                ));
            }
            AuditEntry::new(actor.clone(), AuditAction::RejectedJob, target(job)).notes(reason)
        }
    };

    Ok(JobUpdate {
        job: updated,
        events: vec![event.change(change)],
    })
}

/// Post-approval lifecycle: pause and close. Reopening goes through [`submit_for_approval`].
pub fn change_status(job: &Job, to: JobStatus, actor: &Actor) -> Result<JobUpdate, TransitionError> {
    let action = match (job.status, to) {
        (JobStatus::Open, JobStatus::Paused) => AuditAction::PausedJob,
        (JobStatus::Open | JobStatus::Paused, JobStatus::Closed) => AuditAction::ClosedJob,
        (_, JobStatus::Open) => {
            return Err(TransitionError::new(
                subject(job),
                job.status,
                to,
                "jobs open only through approval",
            ))
        }
        _ => {
            return Err(TransitionError::new(
                subject(job),
                job.status,
                to,
                "transition not allowed",
            ))
        }
    };

    if !actor.is_human() {
        return Err(TransitionError::new(
            subject(job),
            job.status,
            to,
            "status changes require a recruiter or admin",
        ));
    }

    let mut updated = job.clone();
    updated.status = to;

    let event = AuditEntry::new(actor.clone(), action, target(job)).change(AuditChange::JobStatus {
        from: job.status,
        to,
    });

    Ok(JobUpdate {
        job: updated,
        events: vec![event],
    })
}
