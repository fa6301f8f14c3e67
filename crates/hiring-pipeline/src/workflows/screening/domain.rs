use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::risk::RiskLevel;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

entity_id!(
    /// Identifier wrapper for job postings.
    JobId
);
entity_id!(
    /// Identifier wrapper for submitted applications.
    ApplicationId
);
entity_id!(ThreadId);
entity_id!(MessageId);

/// Who performed an audit-worthy action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub const SYSTEM_ID: &'static str = "system";

    pub fn system() -> Self {
        Self {
            id: Self::SYSTEM_ID.to_string(),
            role: ActorRole::System,
        }
    }

    pub fn recruiter(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Recruiter,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Admin,
        }
    }

    pub fn is_human(&self) -> bool {
        self.role != ActorRole::System
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.role.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Recruiter,
    Admin,
    System,
}

impl ActorRole {
    pub const fn label(self) -> &'static str {
        match self {
            ActorRole::Recruiter => "recruiter",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "recruiter" => Some(Self::Recruiter),
            "admin" => Some(Self::Admin),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Publication lifecycle of a job posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    PendingApproval,
    Open,
    Paused,
    Closed,
}

impl JobStatus {
    pub const fn label(self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::PendingApproval => "pending_approval",
            JobStatus::Open => "open",
            JobStatus::Paused => "paused",
            JobStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub description: String,
    pub recruiter: String,
    pub status: JobStatus,
    /// Latest computed risk level; refreshed whenever the job is assessed.
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Job {
    /// Text handed to the scorer as the job side of the pairing.
    pub fn scoring_text(&self) -> String {
        format!("{}\n{}", self.title, self.description)
    }
}

/// Candidate details carried with an application. Opaque to the pipeline apart from `summary`,
/// which is what the scorer reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Normal,
}

impl Confidence {
    pub const fn label(self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Normal => "normal",
        }
    }
}

/// Lifecycle stage of a single application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    New,
    #[serde(rename = "ai_screened")]
    AIScreened,
    Shortlisted,
    Rejected,
    Hired,
}

impl Stage {
    pub const fn label(self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::AIScreened => "ai_screened",
            Stage::Shortlisted => "shortlisted",
            Stage::Rejected => "rejected",
            Stage::Hired => "hired",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Stage::Rejected | Stage::Hired)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Who decided the application's current stage.
///
/// Automation may only move an application whose provenance is `Automated`; once a human has
/// decided, later scores are kept for display but never move the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionProvenance {
    Automated {
        score: u8,
        confidence: Confidence,
    },
    Human {
        actor: Actor,
        reason: String,
        decided_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub job_id: JobId,
    pub candidate: CandidateProfile,
    /// Most recent score, 0..=100. Updated by every successful scorer run, even after an override.
    pub score: u8,
    pub confidence: Confidence,
    pub stage: Stage,
    pub provenance: DecisionProvenance,
    pub submitted_at: DateTime<Utc>,
    pub version: u64,
}

impl Application {
    pub fn is_overridden(&self) -> bool {
        matches!(self.provenance, DecisionProvenance::Human { .. })
    }

    pub fn override_reason(&self) -> Option<&str> {
        match &self.provenance {
            DecisionProvenance::Human { reason, .. } => Some(reason),
            DecisionProvenance::Automated { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Recruiter,
    Candidate,
    System,
}

impl SenderRole {
    pub const fn label(self) -> &'static str {
        match self {
            SenderRole::Recruiter => "recruiter",
            SenderRole::Candidate => "candidate",
            SenderRole::System => "system",
        }
    }
}

/// Moderation state of a message. Moves out of `Unscanned` exactly once via the flagger, and
/// out of `Flagged` only through an explicit human clearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModerationStatus {
    Unscanned,
    Clean,
    /// The classifier was unavailable; treated as unflagged.
    Unverified,
    Flagged {
        reason: String,
    },
    Cleared {
        reason: String,
        cleared_by: Actor,
        note: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender: SenderRole,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub moderation: ModerationStatus,
}

impl Message {
    pub fn flagged(&self) -> bool {
        matches!(self.moderation, ModerationStatus::Flagged { .. })
    }

    pub fn flag_reason(&self) -> Option<&str> {
        match &self.moderation {
            ModerationStatus::Flagged { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Conversation between the recruiting team and one candidate about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub job_id: JobId,
    pub application_id: ApplicationId,
    pub messages: Vec<Message>,
    pub unread: u32,
    pub version: u64,
}

impl Thread {
    pub fn flagged_count(&self) -> usize {
        self.messages.iter().filter(|message| message.flagged()).count()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }
}
