//! Append-only audit trail.
//!
//! Every state-changing action in the pipeline lands here with its actor. Events carry an
//! optional structured [`AuditChange`] so application state can be rebuilt from the log alone
//! (see [`replay`]).

mod export;
pub mod replay;

pub use export::{export_csv, AuditExportError};
pub use replay::{replay_application, ApplicationSnapshot};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Actor, ApplicationId, Confidence, JobId, JobStatus, MessageId, Stage};

/// Enumerated audit verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ApplicationReceived,
    AutomatedScreening,
    Rescored,
    AutoShortlisted,
    Shortlisted,
    ScoringDegraded,
    OverrideRanking,
    OverridePreserved,
    ConflictingOverride,
    MessageFlagged,
    ModerationDegraded,
    FlagCleared,
    JobCreated,
    SubmittedForApproval,
    ApprovedJob,
    RejectedJob,
    PausedJob,
    ClosedJob,
    UpdatedScoringWeights,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            AuditAction::ApplicationReceived => "Application received",
            AuditAction::AutomatedScreening => "Automated screening",
            AuditAction::Rescored => "Rescored application",
            AuditAction::AutoShortlisted => "Auto-shortlisted",
            AuditAction::Shortlisted => "Shortlisted candidate",
            AuditAction::ScoringDegraded => "Scoring unavailable",
            AuditAction::OverrideRanking => "Override ranking",
            AuditAction::OverridePreserved => "Override preserved",
            AuditAction::ConflictingOverride => "Conflicting override",
            AuditAction::MessageFlagged => "Flagged message",
            AuditAction::ModerationDegraded => "Moderation unavailable",
            AuditAction::FlagCleared => "Cleared message flag",
            AuditAction::JobCreated => "Created job",
            AuditAction::SubmittedForApproval => "Submitted job for approval",
            AuditAction::ApprovedJob => "Approved job",
            AuditAction::RejectedJob => "Rejected job",
            AuditAction::PausedJob => "Paused job",
            AuditAction::ClosedJob => "Closed job",
            AuditAction::UpdatedScoringWeights => "Updated scoring weights",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Entity an audit event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuditTarget {
    Application(ApplicationId),
    Job(JobId),
    Message(MessageId),
    Global,
}

impl AuditTarget {
    pub const fn kind(&self) -> &'static str {
        match self {
            AuditTarget::Application(_) => "application",
            AuditTarget::Job(_) => "job",
            AuditTarget::Message(_) => "message",
            AuditTarget::Global => "global",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            AuditTarget::Application(id) => Some(id.as_str()),
            AuditTarget::Job(id) => Some(id.as_str()),
            AuditTarget::Message(id) => Some(id.as_str()),
            AuditTarget::Global => None,
        }
    }
}

impl fmt::Display for AuditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}:{}", self.kind(), id),
            None => f.write_str("Global"),
        }
    }
}

/// Structured state delta recorded alongside an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditChange {
    Stage {
        from: Option<Stage>,
        to: Stage,
    },
    Score {
        score: u8,
        confidence: Confidence,
    },
    StageAndScore {
        from: Option<Stage>,
        to: Stage,
        score: u8,
        confidence: Confidence,
    },
    Override {
        from: Stage,
        to: Stage,
    },
    JobStatus {
        from: JobStatus,
        to: JobStatus,
    },
    Moderation {
        flagged: bool,
    },
}

/// An event as submitted by the pipeline, before the log orders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub actor: Actor,
    pub action: AuditAction,
    pub target: AuditTarget,
    pub notes: String,
    pub change: Option<AuditChange>,
}

impl AuditEntry {
    pub fn new(actor: Actor, action: AuditAction, target: AuditTarget) -> Self {
        Self {
            actor,
            action,
            target,
            notes: String::new(),
            change: None,
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn change(mut self, change: AuditChange) -> Self {
        self.change = Some(change);
        self
    }
}

/// Immutable, ordered audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: AuditAction,
    pub target: AuditTarget,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<AuditChange>,
}

impl AuditEvent {
    /// Total order of the log: timestamp, then insertion sequence.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}

/// Append-only storage for audit events.
pub trait AuditLog: Send + Sync {
    /// Appends every entry or none of them, in order.
    fn append_batch(&self, entries: Vec<AuditEntry>) -> Result<Vec<AuditEvent>, AuditError>;

    fn append(&self, entry: AuditEntry) -> Result<AuditEvent, AuditError> {
        self.append_batch(vec![entry])?
            .pop()
            .ok_or_else(|| AuditError::Unavailable("audit log dropped the entry".to_string()))
    }

    fn events_for(&self, target: &AuditTarget) -> Result<Vec<AuditEvent>, AuditError>;
    fn events(&self) -> Result<Vec<AuditEvent>, AuditError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit log io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit log entry {line} is unreadable: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("audit log serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("audit log unavailable: {0}")]
    Unavailable(String),
}

/// Hands out sequence numbers and non-decreasing timestamps for a single log.
#[derive(Debug, Default, Clone)]
pub struct AuditSequencer {
    next_sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl AuditSequencer {
    /// Resume numbering after events already persisted.
    pub fn resume_after(events: &[AuditEvent]) -> Self {
        let mut sequencer = Self::default();
        for event in events {
            sequencer.next_sequence = sequencer.next_sequence.max(event.sequence + 1);
            sequencer.last_timestamp = Some(match sequencer.last_timestamp {
                Some(last) => last.max(event.timestamp),
                None => event.timestamp,
            });
        }
        sequencer
    }

    pub fn stamp(&mut self, entry: AuditEntry, now: DateTime<Utc>) -> AuditEvent {
        // wall clock may step backwards; the log never does
        let timestamp = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.last_timestamp = Some(timestamp);

        AuditEvent {
            sequence,
            timestamp,
            actor: entry.actor,
            action: entry.action,
            target: entry.target,
            notes: entry.notes,
            change: entry.change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry() -> AuditEntry {
        AuditEntry::new(Actor::system(), AuditAction::JobCreated, AuditTarget::Global)
    }

    #[test]
    fn sequencer_clamps_backwards_clock() {
        let mut sequencer = AuditSequencer::default();
        let now = Utc::now();
        let first = sequencer.stamp(entry(), now);
        let second = sequencer.stamp(entry(), now - Duration::seconds(5));

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.timestamp, first.timestamp);
        assert!(first.order_key() < second.order_key());
    }

    #[test]
    fn sequencer_resumes_after_persisted_events() {
        let mut sequencer = AuditSequencer::default();
        let now = Utc::now();
        let events = vec![sequencer.stamp(entry(), now), sequencer.stamp(entry(), now)];

        let mut resumed = AuditSequencer::resume_after(&events);
        let next = resumed.stamp(entry(), now - Duration::minutes(1));
        assert_eq!(next.sequence, 2);
        assert_eq!(next.timestamp, now);
    }

    #[test]
    fn target_display_names_kind_and_id() {
        let target = AuditTarget::Job(JobId::from("job-000001"));
        assert_eq!(target.to_string(), "job:job-000001");
        assert_eq!(AuditTarget::Global.to_string(), "Global");
    }

    #[test]
    fn action_labels_match_audit_vocabulary() {
        assert_eq!(AuditAction::ApprovedJob.label(), "Approved job");
        assert_eq!(AuditAction::OverrideRanking.label(), "Override ranking");
        assert_eq!(
            AuditAction::UpdatedScoringWeights.label(),
            "Updated scoring weights"
        );
    }
}
