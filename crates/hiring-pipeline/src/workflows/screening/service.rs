use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::approval::{self, JobDecision, JobUpdate};
use super::audit::{
    replay_application, ApplicationSnapshot, AuditAction, AuditChange, AuditEntry, AuditError,
    AuditEvent, AuditLog, AuditTarget,
};
use super::domain::{
    Actor, ActorRole, Application, ApplicationId, CandidateProfile, Confidence,
    DecisionProvenance, Job, JobId, JobStatus, Message, MessageId, ModerationStatus, SenderRole,
    Stage, Thread, ThreadId,
};
use super::locks::EntityLocks;
use super::moderation::{ClassificationError, Flagger, Verdict};
use super::policy::{AutoApproval, ScreeningPolicy};
use super::repository::{Notification, Notifier, PipelineRepository, RepositoryError};
use super::risk::{RiskAssessment, RiskAssessor, RiskLevel, RiskPolicy};
use super::scoring::{ScoreResult, Scorer, ScoringError};
use super::stage::{self, ScreeningOutcome, StageUpdate, TransitionError};

const MAX_WRITE_ATTEMPTS: u32 = 3;
const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Id counters owned by one service, resumed past every id the audit log already mentions.
#[derive(Debug)]
struct IdSequences {
    job: AtomicU64,
    application: AtomicU64,
    thread: AtomicU64,
    message: AtomicU64,
}

impl IdSequences {
    fn resume_after(events: &[AuditEvent]) -> Self {
        let (mut job, mut application, mut message) = (0, 0, 0);
        for event in events {
            let (highest, id) = match &event.target {
                AuditTarget::Job(id) => (&mut job, id.as_str()),
                AuditTarget::Application(id) => (&mut application, id.as_str()),
                AuditTarget::Message(id) => (&mut message, id.as_str()),
                AuditTarget::Global => continue,
            };
            if let Some(number) = numeric_suffix(id) {
                *highest = (*highest).max(number);
            }
        }
        Self {
            job: AtomicU64::new(job + 1),
            application: AtomicU64::new(application + 1),
            thread: AtomicU64::new(1),
            message: AtomicU64::new(message + 1),
        }
    }

    fn next(sequence: &AtomicU64, prefix: &str) -> String {
        let id = sequence.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{id:06}")
    }
}

fn numeric_suffix(id: &str) -> Option<u64> {
    id.rsplit_once('-')
        .and_then(|(_, number)| number.parse().ok())
}

/// Request body for a new job posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Inbound application for an open job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSubmission {
    pub job_id: JobId,
    pub candidate: CandidateProfile,
}

/// Application after a scoring pass, with what the pass did.
#[derive(Debug, Clone, Serialize)]
pub struct ScreeningReport {
    pub application: Application,
    pub outcome: ScreeningOutcome,
}

/// Result of submitting a job for approval.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalReport {
    pub job: Job,
    pub assessment: RiskAssessment,
    pub auto_approval: AutoApprovalOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutoApprovalOutcome {
    Approved,
    AwaitingAdmin { reason: String },
}

/// Partial update of the runtime screening policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default)]
    pub shortlist_threshold: Option<u8>,
    #[serde(default)]
    pub risk: Option<RiskPolicy>,
    #[serde(default)]
    pub auto_approve: Option<AutoApproval>,
}

/// Error raised by the screening service.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("automated update for application {application_id} discarded: {detail}")]
    ConflictingOverride {
        application_id: ApplicationId,
        detail: String,
    },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Validation(String),
    #[error("{actor} may not {action}")]
    Unauthorized { actor: String, action: &'static str },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl PipelineError {
    fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            PipelineError::Repository(RepositoryError::VersionConflict { .. })
        )
    }
}

/// Facade composing the stage machine, moderation, risk assessment, approval workflow, and
/// audit log over a repository.
///
/// Scorer and flagger calls happen with no record held: the service reads, calls out, then
/// re-reads and re-validates before writing.
///
/// Each write and its audit entries run under the record's lock and land together: when the
/// audit log refuses the entries, the write is reverted.
pub struct ScreeningService<R, L, N> {
    repository: Arc<R>,
    audit: Arc<L>,
    notifier: Arc<N>,
    scorer: Arc<dyn Scorer>,
    flagger: Arc<dyn Flagger>,
    policy: RwLock<ScreeningPolicy>,
    external_timeout: Duration,
    ids: IdSequences,
    locks: EntityLocks,
}

impl<R, L, N> ScreeningService<R, L, N>
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        repository: Arc<R>,
        audit: Arc<L>,
        notifier: Arc<N>,
        scorer: Arc<dyn Scorer>,
        flagger: Arc<dyn Flagger>,
        policy: ScreeningPolicy,
    ) -> Self {
        let ids = match audit.events() {
            Ok(events) => IdSequences::resume_after(&events),
            Err(err) => {
                warn!(error = %err, "audit log unreadable; id numbering starts at 1");
                IdSequences::resume_after(&[])
            }
        };
        Self {
            repository,
            audit,
            notifier,
            scorer,
            flagger,
            policy: RwLock::new(policy),
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
            ids,
            locks: EntityLocks::default(),
        }
    }

    /// Bound on every scorer/flagger call; past it the degraded path applies.
    pub fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    pub fn policy(&self) -> ScreeningPolicy {
        match self.policy.read() {
            Ok(policy) => *policy,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    // ---- jobs -------------------------------------------------------------------------------

    pub fn create_job(&self, request: NewJob, actor: &Actor) -> Result<Job, PipelineError> {
        require_human(actor, "create jobs")?;
        let title = request.title.trim();
        if title.is_empty() {
            return Err(PipelineError::Validation("job title is required".to_string()));
        }

        let job = Job {
            id: JobId(IdSequences::next(&self.ids.job, "job")),
            title: title.to_string(),
            description: request.description.trim().to_string(),
            recruiter: actor.id.clone(),
            status: JobStatus::Draft,
            risk_level: RiskLevel::None,
            created_at: Utc::now(),
            version: 0,
        };
        let key = job.id.clone();
        let stored = self.locks.run(key.as_str(), || {
            let stored = self.repository.insert_job(job)?;
            let entry = AuditEntry::new(
                actor.clone(),
                AuditAction::JobCreated,
                AuditTarget::Job(stored.id.clone()),
            )
            .notes(stored.title.clone());
            self.commit(stored, vec![entry], |stored| {
                self.repository.discard_job(&stored.id)
            })
        })?;

        info!(job_id = %stored.id, "job created");
        Ok(stored)
    }

    pub fn job(&self, id: &JobId) -> Result<Job, PipelineError> {
        self.repository
            .fetch_job(id)?
            .ok_or_else(|| PipelineError::not_found("job", id))
    }

    pub fn jobs(&self) -> Result<Vec<Job>, PipelineError> {
        Ok(self.repository.jobs()?)
    }

    /// Pure assessment over the job's threads and applications. Caches the level on the job
    /// but writes nothing to the audit log.
    pub fn assess_job_risk(&self, id: &JobId) -> Result<RiskAssessment, PipelineError> {
        let assessment = self.compute_assessment(id)?;

        self.locks.run(id.as_str(), || {
            self.retrying(|| {
                let mut job = self.job(id)?;
                if job.risk_level != assessment.level {
                    job.risk_level = assessment.level;
                    self.repository.update_job(job)?;
                }
                Ok(())
            })
        })?;

        Ok(assessment)
    }

    pub fn submit_job_for_approval(
        &self,
        id: &JobId,
        actor: &Actor,
    ) -> Result<ApprovalReport, PipelineError> {
        require_human(actor, "submit jobs for approval")?;
        let assessment = self.compute_assessment(id)?;

        let submitted = self.write_job(id, |job| approval::submit_for_approval(job, actor, &assessment))?;
        info!(job_id = %id, risk = %assessment.level, "job submitted for approval");

        let (job, auto_approval) = match self.approve_automatically(id, &assessment) {
            Ok(job) => (job, AutoApprovalOutcome::Approved),
            Err(PipelineError::InvalidTransition(err)) => {
                info!(job_id = %id, reason = %err.reason, "job awaiting admin decision");
                (
                    submitted,
                    AutoApprovalOutcome::AwaitingAdmin { reason: err.reason },
                )
            }
            Err(other) => return Err(other),
        };

        Ok(ApprovalReport {
            job,
            assessment,
            auto_approval,
        })
    }

    /// System approval attempt. Fails with `InvalidTransition` for `High` risk or when the
    /// configured policy does not cover the job's level.
    pub fn auto_approve_job(&self, id: &JobId) -> Result<Job, PipelineError> {
        let assessment = self.compute_assessment(id)?;
        self.approve_automatically(id, &assessment)
    }

    fn approve_automatically(
        &self,
        id: &JobId,
        assessment: &RiskAssessment,
    ) -> Result<Job, PipelineError> {
        let mode = self.policy().auto_approve;
        let job = self.write_job(id, |job| approval::auto_approve(job, assessment, mode))?;
        self.notify(
            Notification::new("job_approved", job.id.as_str())
                .detail("decided_by", Actor::SYSTEM_ID)
                .detail("risk", assessment.level.label()),
        );
        Ok(job)
    }

    pub fn decide_job(
        &self,
        id: &JobId,
        decision: JobDecision,
        actor: &Actor,
    ) -> Result<Job, PipelineError> {
        let assessment = self.compute_assessment(id)?;
        let job = self.write_job(id, |job| approval::decide(job, &decision, actor, &assessment))?;

        let notification = match &decision {
            JobDecision::Approve { .. } => Notification::new("job_approved", job.id.as_str()),
            JobDecision::Reject { reason } => {
                Notification::new("job_rejected", job.id.as_str()).detail("reason", reason.trim())
            }
        };
        self.notify(
            notification
                .detail("decided_by", actor.id.clone())
                .detail("risk", assessment.level.label()),
        );
        info!(job_id = %id, status = %job.status, admin = %actor.id, "job decision recorded");
        Ok(job)
    }

    pub fn change_job_status(
        &self,
        id: &JobId,
        to: JobStatus,
        actor: &Actor,
    ) -> Result<Job, PipelineError> {
        self.write_job(id, |job| approval::change_status(job, to, actor))
    }

    pub fn pause_job(&self, id: &JobId, actor: &Actor) -> Result<Job, PipelineError> {
        self.change_job_status(id, JobStatus::Paused, actor)
    }

    /// Paused jobs reopen through approval, against a fresh risk assessment.
    pub fn resume_job(&self, id: &JobId, actor: &Actor) -> Result<ApprovalReport, PipelineError> {
        self.submit_job_for_approval(id, actor)
    }

    pub fn close_job(&self, id: &JobId, actor: &Actor) -> Result<Job, PipelineError> {
        self.change_job_status(id, JobStatus::Closed, actor)
    }

    // ---- applications -----------------------------------------------------------------------

    /// Intake. The application is stored as `New`/`Low` before the scorer runs, so a scorer
    /// outage never blocks intake.
    pub async fn submit_application(
        &self,
        submission: ApplicationSubmission,
    ) -> Result<ScreeningReport, PipelineError> {
        let job = self.job(&submission.job_id)?;
        if job.status != JobStatus::Open {
            return Err(TransitionError::new(
                format!("job {}", job.id),
                job.status,
                "application intake",
                "job is not accepting applications",
            )
            .into());
        }
        let candidate = submission.candidate;
        if candidate.name.trim().is_empty() || candidate.email.trim().is_empty() {
            return Err(PipelineError::Validation(
                "candidate name and email are required".to_string(),
            ));
        }

        let application = Application {
            id: ApplicationId(IdSequences::next(&self.ids.application, "app")),
            job_id: job.id.clone(),
            candidate,
            score: 0,
            confidence: Confidence::Low,
            stage: Stage::New,
            provenance: DecisionProvenance::Automated {
                score: 0,
                confidence: Confidence::Low,
            },
            submitted_at: Utc::now(),
            version: 0,
        };
        let key = application.id.clone();
        let stored = self.locks.run(key.as_str(), || {
            let stored = self.repository.insert_application(application)?;
            let entry = AuditEntry::new(
                Actor::system(),
                AuditAction::ApplicationReceived,
                AuditTarget::Application(stored.id.clone()),
            )
            .notes(format!("{} applied to {}", stored.candidate.name, job.id))
            .change(AuditChange::StageAndScore {
                from: None,
                to: Stage::New,
                score: stored.score,
                confidence: stored.confidence,
            });
            self.commit(stored, vec![entry], |stored| {
                self.repository.discard_application(&stored.id)
            })
        })?;
        info!(application_id = %stored.id, job_id = %job.id, "application received");

        match self.rescore_application(&stored.id).await {
            Err(PipelineError::ConflictingOverride { .. }) => Ok(ScreeningReport {
                application: self.application(&stored.id)?,
                outcome: ScreeningOutcome::OverridePreserved,
            }),
            other => other,
        }
    }

    /// Runs the scorer and applies the result.
    ///
    /// If a human override lands while the scorer is running, the automated result is
    /// discarded, a `ConflictingOverride` event is logged, and the call fails with
    /// [`PipelineError::ConflictingOverride`].
    pub async fn rescore_application(
        &self,
        id: &ApplicationId,
    ) -> Result<ScreeningReport, PipelineError> {
        let snapshot = self.application(id)?;
        let job = self.job(&snapshot.job_id)?;

        let result = match self.run_scorer(&snapshot.candidate, &job).await {
            Ok(result) => result,
            Err(err) => return self.record_scoring_degraded(snapshot, err),
        };

        self.apply_score(&snapshot, result)
    }

    fn apply_score(
        &self,
        snapshot: &Application,
        result: ScoreResult,
    ) -> Result<ScreeningReport, PipelineError> {
        let id = &snapshot.id;
        let backend = self.scorer.backend();

        self.locks.run(id.as_str(), || {
            self.retrying(|| {
                let current = self.application(id)?;
                if current.is_overridden() && current.provenance != snapshot.provenance {
                    return Err(self.record_conflicting_override(&current, result)?);
                }

                let threshold = self.policy().shortlist_threshold;
                let update = stage::apply_automated_score(&current, result, threshold, backend)?;
                if update.is_noop() {
                    debug!(application_id = %id, "scorer result identical; nothing to record");
                    return Ok(ScreeningReport {
                        application: current,
                        outcome: ScreeningOutcome::Unchanged,
                    });
                }

                let outcome = update.outcome;
                let application = self.store_application(&current, update)?;
                info!(
                    application_id = %id,
                    stage = %application.stage,
                    score = application.score,
                    ?outcome,
                    "automated screening applied"
                );
                Ok(ScreeningReport {
                    application,
                    outcome,
                })
            })
        })
    }

    fn record_conflicting_override(
        &self,
        current: &Application,
        result: ScoreResult,
    ) -> Result<PipelineError, PipelineError> {
        let detail = format!(
            "override by {} landed while scoring; discarded score {} ({} confidence)",
            override_actor(current),
            result.score,
            result.confidence.label()
        );
        warn!(application_id = %current.id, %detail, "conflicting override");
        self.record(vec![AuditEntry::new(
            Actor::system(),
            AuditAction::ConflictingOverride,
            AuditTarget::Application(current.id.clone()),
        )
        .notes(detail.clone())])?;

        Ok(PipelineError::ConflictingOverride {
            application_id: current.id.clone(),
            detail,
        })
    }

    fn record_scoring_degraded(
        &self,
        application: Application,
        err: ScoringError,
    ) -> Result<ScreeningReport, PipelineError> {
        warn!(
            application_id = %application.id,
            error = %err,
            "scorer unavailable; leaving application for manual triage"
        );
        self.record(vec![AuditEntry::new(
            Actor::system(),
            AuditAction::ScoringDegraded,
            AuditTarget::Application(application.id.clone()),
        )
        .notes(format!(
            "{err}; left in stage {} with {} confidence for manual triage",
            application.stage,
            application.confidence.label()
        ))])?;

        Ok(ScreeningReport {
            application,
            outcome: ScreeningOutcome::Degraded,
        })
    }

    pub fn shortlist_application(
        &self,
        id: &ApplicationId,
        actor: &Actor,
    ) -> Result<Application, PipelineError> {
        self.write_application(id, |application| stage::shortlist(application, actor))
    }

    /// Human override to any stage; always audited with the actor.
    pub fn override_stage(
        &self,
        id: &ApplicationId,
        to: Stage,
        reason: &str,
        actor: &Actor,
    ) -> Result<Application, PipelineError> {
        let now = Utc::now();
        let application = self.write_application(id, |application| {
            stage::apply_override(application, to, actor, reason, now)
        })?;

        if to.is_terminal() {
            self.notify(
                Notification::new(
                    if to == Stage::Hired {
                        "candidate_hired"
                    } else {
                        "candidate_rejected"
                    },
                    application.id.as_str(),
                )
                .detail("job_id", application.job_id.as_str())
                .detail("email", application.candidate.email.clone())
                .detail("decided_by", actor.id.clone()),
            );
        }
        info!(application_id = %id, stage = %to, actor = %actor.id, "stage overridden");
        Ok(application)
    }

    pub fn application(&self, id: &ApplicationId) -> Result<Application, PipelineError> {
        self.repository
            .fetch_application(id)?
            .ok_or_else(|| PipelineError::not_found("application", id))
    }

    pub fn applications_for_job(&self, job_id: &JobId) -> Result<Vec<Application>, PipelineError> {
        self.job(job_id)?;
        Ok(self.repository.applications_for_job(job_id)?)
    }

    // ---- threads & moderation ---------------------------------------------------------------

    /// Opens (or returns the existing) conversation with an applicant.
    pub fn open_thread(
        &self,
        application_id: &ApplicationId,
        actor: &Actor,
    ) -> Result<Thread, PipelineError> {
        require_human(actor, "open conversations")?;
        let application = self.application(application_id)?;

        self.locks.run(application_id.as_str(), || -> Result<Thread, PipelineError> {
            if let Some(existing) = self
                .repository
                .threads_for_job(&application.job_id)?
                .into_iter()
                .find(|thread| &thread.application_id == application_id)
            {
                return Ok(existing);
            }

            let thread = Thread {
                id: ThreadId(IdSequences::next(&self.ids.thread, "thread")),
                job_id: application.job_id.clone(),
                application_id: application.id.clone(),
                messages: Vec::new(),
                unread: 0,
                version: 0,
            };
            Ok(self.repository.insert_thread(thread)?)
        })
    }

    pub fn thread(&self, id: &ThreadId) -> Result<Thread, PipelineError> {
        self.repository
            .fetch_thread(id)?
            .ok_or_else(|| PipelineError::not_found("thread", id))
    }

    /// Posts a message after running it through the flagger.
    ///
    /// A flagger outage leaves the message `Unverified` (unflagged) and records a
    /// `ModerationDegraded` event so the gap is visible.
    pub async fn post_message(
        &self,
        thread_id: &ThreadId,
        sender: SenderRole,
        text: &str,
    ) -> Result<Message, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Validation("message text is required".to_string()));
        }
        self.thread(thread_id)?;

        let classification = self.run_flagger(text).await;
        let message_id = MessageId(IdSequences::next(&self.ids.message, "msg"));
        let (moderation, audit) = match classification {
            Ok(Verdict {
                flagged: true,
                reason,
            }) => {
                let reason = reason.unwrap_or_else(|| "flagged by moderation".to_string());
                let entry = AuditEntry::new(
                    Actor::system(),
                    AuditAction::MessageFlagged,
                    AuditTarget::Message(message_id.clone()),
                )
                .notes(format!("{} ({})", reason, self.flagger.backend()))
                .change(AuditChange::Moderation { flagged: true });
                (ModerationStatus::Flagged { reason }, Some(entry))
            }
            Ok(_) => (ModerationStatus::Clean, None),
            Err(err) => {
                warn!(thread_id = %thread_id, error = %err, "moderation unavailable; message left unverified");
                let entry = AuditEntry::new(
                    Actor::system(),
                    AuditAction::ModerationDegraded,
                    AuditTarget::Message(message_id.clone()),
                )
                .notes(format!("{err}; message stored unflagged"));
                (ModerationStatus::Unverified, Some(entry))
            }
        };

        let message = Message {
            id: message_id,
            thread_id: thread_id.clone(),
            sender,
            text: text.to_string(),
            sent_at: Utc::now(),
            moderation,
        };

        self.locks.run(thread_id.as_str(), || {
            let (previous, stored) = self.retrying(|| {
                let previous = self.thread(thread_id)?;
                let mut thread = previous.clone();
                thread.messages.push(message.clone());
                if sender != SenderRole::Recruiter {
                    thread.unread = thread.unread.saturating_add(1);
                }
                Ok((previous, self.repository.update_thread(thread)?))
            })?;
            self.commit(stored, audit.into_iter().collect(), |stored| {
                self.restore_thread(previous, stored)
            })
        })?;

        if message.flagged() {
            info!(message_id = %message.id, thread_id = %thread_id, "message flagged");
        }
        Ok(message)
    }

    pub fn mark_thread_read(&self, id: &ThreadId) -> Result<Thread, PipelineError> {
        self.locks.run(id.as_str(), || {
            self.retrying(|| {
                let mut thread = self.thread(id)?;
                if thread.unread == 0 {
                    return Ok(thread);
                }
                thread.unread = 0;
                Ok(self.repository.update_thread(thread)?)
            })
        })
    }

    /// Explicit human reversal of a flag, recorded as an override.
    pub fn clear_message_flag(
        &self,
        message_id: &MessageId,
        reason: &str,
        actor: &Actor,
    ) -> Result<Message, PipelineError> {
        let subject = format!("message {message_id}");
        if !actor.is_human() {
            return Err(TransitionError::new(
                subject,
                "flagged",
                "cleared",
                "only a human reviewer may clear a flag",
            )
            .into());
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TransitionError::new(
                subject,
                "flagged",
                "cleared",
                "a reason is required to clear a flag",
            )
            .into());
        }

        let thread_id = self
            .repository
            .thread_for_message(message_id)?
            .ok_or_else(|| PipelineError::not_found("message", message_id))?
            .id;

        self.locks.run(thread_id.as_str(), || -> Result<Message, PipelineError> {
            let (previous, stored, message) = self.retrying(|| {
                let previous = self.thread(&thread_id)?;
                let mut thread = previous.clone();
                let message = thread
                    .messages
                    .iter_mut()
                    .find(|message| &message.id == message_id)
                    .ok_or_else(|| PipelineError::not_found("message", message_id))?;

                let flag_reason = match &message.moderation {
                    ModerationStatus::Flagged { reason } => reason.clone(),
                    _ => {
                        return Err(TransitionError::new(
                            subject.clone(),
                            "unflagged",
                            "cleared",
                            "message is not flagged",
                        )
                        .into())
                    }
                };
                message.moderation = ModerationStatus::Cleared {
                    reason: flag_reason,
                    cleared_by: actor.clone(),
                    note: reason.to_string(),
                };
                let message = message.clone();
                let stored = self.repository.update_thread(thread)?;
                Ok((previous, stored, message))
            })?;

            let entry = AuditEntry::new(
                actor.clone(),
                AuditAction::FlagCleared,
                AuditTarget::Message(message_id.clone()),
            )
            .notes(format!("override: {reason}"))
            .change(AuditChange::Moderation { flagged: false });
            self.commit(stored, vec![entry], |stored| self.restore_thread(previous, stored))?;
            Ok(message)
        })
    }

    // ---- policy & audit ---------------------------------------------------------------------

    pub fn update_screening_policy(
        &self,
        update: PolicyUpdate,
        actor: &Actor,
    ) -> Result<ScreeningPolicy, PipelineError> {
        if actor.role != ActorRole::Admin {
            return Err(PipelineError::Unauthorized {
                actor: actor.to_string(),
                action: "change screening policy",
            });
        }
        if let Some(threshold) = update.shortlist_threshold {
            if threshold > 100 {
                return Err(PipelineError::Validation(format!(
                    "shortlist threshold {threshold} must be within 0..=100"
                )));
            }
        }
        if let Some(risk) = update.risk {
            RiskPolicy::new(risk.flag_threshold, risk.policy_check_ratio, risk.high_ratio)
                .map_err(PipelineError::Validation)?;
        }

        let after = {
            let mut policy = match self.policy.write() {
                Ok(policy) => policy,
                Err(poisoned) => poisoned.into_inner(),
            };
            let before = *policy;
            let mut after = before;
            if let Some(threshold) = update.shortlist_threshold {
                after.shortlist_threshold = threshold;
            }
            if let Some(risk) = update.risk {
                after.risk = risk;
            }
            if let Some(mode) = update.auto_approve {
                after.auto_approve = mode;
            }

            // the new policy takes effect only once its audit entry is written
            self.record(vec![AuditEntry::new(
                actor.clone(),
                AuditAction::UpdatedScoringWeights,
                AuditTarget::Global,
            )
            .notes(format!("{} -> {}", before.summary(), after.summary()))])?;
            *policy = after;
            after
        };
        info!(admin = %actor.id, policy = %after.summary(), "screening policy updated");
        Ok(after)
    }

    pub fn audit_trail(&self, target: &AuditTarget) -> Result<Vec<AuditEvent>, PipelineError> {
        let mut events = self.audit.events_for(target)?;
        events.sort_by_key(AuditEvent::order_key);
        Ok(events)
    }

    pub fn audit_events(&self) -> Result<Vec<AuditEvent>, PipelineError> {
        let mut events = self.audit.events()?;
        events.sort_by_key(AuditEvent::order_key);
        Ok(events)
    }

    /// Rebuilds the application's stage and score from its audit events alone.
    pub fn replay_application(
        &self,
        id: &ApplicationId,
    ) -> Result<ApplicationSnapshot, PipelineError> {
        let events = self.audit.events_for(&AuditTarget::Application(id.clone()))?;
        replay_application(id, &events).ok_or_else(|| PipelineError::not_found("application", id))
    }

    // ---- internals --------------------------------------------------------------------------

    fn compute_assessment(&self, id: &JobId) -> Result<RiskAssessment, PipelineError> {
        let job = self.job(id)?;
        let threads = self.repository.threads_for_job(id)?;
        let applications = self.repository.applications_for_job(id)?;
        let assessor = RiskAssessor::new(self.policy().risk);
        Ok(assessor.assess(&job, &threads, &applications, Utc::now()))
    }

    async fn run_scorer(
        &self,
        candidate: &CandidateProfile,
        job: &Job,
    ) -> Result<ScoreResult, ScoringError> {
        match tokio::time::timeout(self.external_timeout, self.scorer.score(candidate, job)).await {
            Ok(result) => result,
            Err(_) => Err(ScoringError::TimedOut(self.external_timeout)),
        }
    }

    async fn run_flagger(&self, text: &str) -> Result<Verdict, ClassificationError> {
        match tokio::time::timeout(self.external_timeout, self.flagger.classify(text)).await {
            Ok(result) => result,
            Err(_) => Err(ClassificationError::TimedOut(self.external_timeout)),
        }
    }

    /// Re-runs `attempt` when it fails on a stale version, up to `MAX_WRITE_ATTEMPTS` times.
    fn retrying<T>(
        &self,
        mut attempt: impl FnMut() -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt() {
                Err(err) if err.is_version_conflict() && tries < MAX_WRITE_ATTEMPTS => {
                    debug!(tries, "version conflict; retrying write");
                }
                other => return other,
            }
        }
    }

    fn write_application(
        &self,
        id: &ApplicationId,
        transition: impl Fn(&Application) -> Result<StageUpdate, TransitionError>,
    ) -> Result<Application, PipelineError> {
        self.locks.run(id.as_str(), || {
            self.retrying(|| {
                let current = self.application(id)?;
                let update = transition(&current)?;
                self.store_application(&current, update)
            })
        })
    }

    /// Caller holds the application's lock.
    fn store_application(
        &self,
        previous: &Application,
        update: StageUpdate,
    ) -> Result<Application, PipelineError> {
        let stored = self.repository.update_application(update.application)?;
        self.commit(stored, update.events, |stored| {
            let mut restore = previous.clone();
            restore.version = stored.version;
            self.repository.update_application(restore).map(drop)
        })
    }

    fn write_job(
        &self,
        id: &JobId,
        transition: impl Fn(&Job) -> Result<JobUpdate, TransitionError>,
    ) -> Result<Job, PipelineError> {
        self.locks.run(id.as_str(), || {
            self.retrying(|| {
                let current = self.job(id)?;
                let update = transition(&current)?;
                let stored = self.repository.update_job(update.job)?;
                self.commit(stored, update.events, |stored| {
                    let mut restore = current.clone();
                    restore.version = stored.version;
                    self.repository.update_job(restore).map(drop)
                })
            })
        })
    }

    fn restore_thread(&self, previous: Thread, stored: &Thread) -> Result<(), RepositoryError> {
        let mut restore = previous;
        restore.version = stored.version;
        self.repository.update_thread(restore).map(drop)
    }

    /// Writes the audit entries for a change that has already been stored. If the log refuses
    /// them, `revert` undoes the change: the store never runs ahead of the audit trail.
    fn commit<T>(
        &self,
        stored: T,
        entries: Vec<AuditEntry>,
        revert: impl FnOnce(&T) -> Result<(), RepositoryError>,
    ) -> Result<T, PipelineError> {
        let err = match self.record(entries) {
            Ok(_) => return Ok(stored),
            Err(err) => err,
        };
        warn!(error = %err, "audit append failed; reverting the stored change");
        if let Err(revert_err) = revert(&stored) {
            error!(
                error = %revert_err,
                audit_error = %err,
                "could not revert a change the audit log refused"
            );
        }
        Err(err.into())
    }

    /// Appends all entries as one batch, or none of them.
    fn record(&self, entries: Vec<AuditEntry>) -> Result<Vec<AuditEvent>, AuditError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        self.audit.append_batch(entries)
    }

    fn notify(&self, notification: Notification) {
        let template = notification.template.clone();
        if let Err(err) = self.notifier.notify(notification) {
            warn!(%template, error = %err, "notification failed; continuing");
        }
    }
}

fn require_human(actor: &Actor, action: &'static str) -> Result<(), PipelineError> {
    if actor.is_human() {
        Ok(())
    } else {
        Err(PipelineError::Unauthorized {
            actor: actor.to_string(),
            action,
        })
    }
}

fn override_actor(application: &Application) -> &str {
    match &application.provenance {
        DecisionProvenance::Human { actor, .. } => &actor.id,
        DecisionProvenance::Automated { .. } => Actor::SYSTEM_ID,
    }
}
