//! Screening, moderation, and approval workflows.
//!
//! Pure transition logic lives in [`stage`] and [`approval`]; [`service::ScreeningService`]
//! composes it with storage, the audit log, and the external scorer/flagger.

pub mod ai_client;
pub mod approval;
pub mod audit;
pub mod domain;
mod locks;
pub mod moderation;
pub mod policy;
pub mod repository;
pub mod risk;
pub mod router;
pub mod scoring;
pub mod service;
pub mod stage;
pub mod store;
pub mod views;

#[cfg(test)]
mod tests;

pub use ai_client::{AiBackendClient, AiClientError};
pub use approval::JobDecision;
pub use audit::{
    export_csv, replay_application, ApplicationSnapshot, AuditAction, AuditChange, AuditEntry,
    AuditError, AuditEvent, AuditExportError, AuditLog, AuditTarget,
};
pub use domain::{
    Actor, ActorRole, Application, ApplicationId, CandidateProfile, Confidence,
    DecisionProvenance, Job, JobId, JobStatus, Message, MessageId, ModerationStatus, SenderRole,
    Stage, Thread, ThreadId,
};
pub use moderation::{ClassificationError, Flagger, PhraseRule, PhraseRuleFlagger, Verdict};
pub use policy::{AutoApproval, ScreeningPolicy};
pub use repository::{Notification, Notifier, NotifyError, PipelineRepository, RepositoryError};
pub use risk::{RiskAssessment, RiskAssessor, RiskLevel, RiskPolicy, RiskSignals};
pub use router::screening_router;
pub use scoring::{KeywordScorer, ScoreResult, Scorer, ScoringError};
pub use service::{
    ApplicationSubmission, ApprovalReport, AutoApprovalOutcome, NewJob, PipelineError,
    PolicyUpdate, ScreeningReport, ScreeningService,
};
pub use stage::{ScreeningOutcome, TransitionError};
pub use store::{read_events, JsonlAuditLog, MemoryAuditLog, MemoryNotifier, MemoryRepository};
pub use views::{ApplicationView, JobView, ThreadView};
