//! Application stage machine.
//!
//! `New -> AIScreened -> Shortlisted -> {Rejected | Hired}`. Automation drives the first two
//! hops; anything else is a human override. Every function here is pure: it returns the updated
//! application together with the audit entries describing the change, and the caller persists
//! both.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::audit::{AuditAction, AuditChange, AuditEntry, AuditTarget};
use super::domain::{Actor, ActorRole, Application, DecisionProvenance, Stage};
use super::scoring::ScoreResult;

/// Rejected stage or job-status change. Carries no side effects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move {subject} from {from} to {to}: {reason}")]
pub struct TransitionError {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub reason: String,
}

impl TransitionError {
    pub fn new(
        subject: impl Into<String>,
        from: impl ToString,
        to: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }
}

/// What an automated scoring pass did to an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningOutcome {
    Screened,
    Shortlisted,
    Rescored,
    Unchanged,
    OverridePreserved,
    Degraded,
}

#[derive(Debug, Clone)]
pub struct StageUpdate {
    pub application: Application,
    pub events: Vec<AuditEntry>,
    pub outcome: ScreeningOutcome,
}

impl StageUpdate {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

fn target(application: &Application) -> AuditTarget {
    AuditTarget::Application(application.id.clone())
}

/// Applies a scorer result.
///
/// Once a human has decided the stage, the score is stored for display and an
/// `OverridePreserved` event records the disagreement; the stage never moves. Reapplying an
/// identical result is a no-op with no events.
pub fn apply_automated_score(
    application: &Application,
    result: ScoreResult,
    shortlist_threshold: u8,
    backend: &str,
) -> Result<StageUpdate, TransitionError> {
    let mut updated = application.clone();
    let mut events = Vec::new();
    let same_score =
        application.score == result.score && application.confidence == result.confidence;

    if let DecisionProvenance::Human { actor, .. } = &application.provenance {
        if same_score {
            return Ok(unchanged(updated));
        }
        updated.score = result.score;
        updated.confidence = result.confidence;
        events.push(
            AuditEntry::new(
                Actor::system(),
                AuditAction::OverridePreserved,
                target(application),
            )
            .notes(format!(
                "{backend} scored {} ({} confidence); stage {} kept from override by {}",
                result.score,
                result.confidence.label(),
                application.stage,
                actor.id
            ))
            .change(AuditChange::Score {
                score: result.score,
                confidence: result.confidence,
            }),
        );
        return Ok(StageUpdate {
            application: updated,
            events,
            outcome: ScreeningOutcome::OverridePreserved,
        });
    }

    if application.stage.is_terminal() {
        return Err(TransitionError::new(
            format!("application {}", application.id),
            application.stage,
            Stage::AIScreened,
            "terminal stage cannot be rescored by automation",
        ));
    }

    updated.score = result.score;
    updated.confidence = result.confidence;
    updated.provenance = DecisionProvenance::Automated {
        score: result.score,
        confidence: result.confidence,
    };

    let mut outcome = ScreeningOutcome::Unchanged;
    match application.stage {
        Stage::New => {
            updated.stage = Stage::AIScreened;
            outcome = ScreeningOutcome::Screened;
            events.push(
                AuditEntry::new(
                    Actor::system(),
                    AuditAction::AutomatedScreening,
                    target(application),
                )
                .notes(format!(
                    "{backend} scored {} ({} confidence)",
                    result.score,
                    result.confidence.label()
                ))
                .change(AuditChange::StageAndScore {
                    from: Some(Stage::New),
                    to: Stage::AIScreened,
                    score: result.score,
                    confidence: result.confidence,
                }),
            );
        }
        Stage::AIScreened | Stage::Shortlisted if !same_score => {
            outcome = ScreeningOutcome::Rescored;
            events.push(
                AuditEntry::new(Actor::system(), AuditAction::Rescored, target(application))
                    .notes(format!(
                        "{backend} rescored {} -> {} ({} confidence)",
                        application.score,
                        result.score,
                        result.confidence.label()
                    ))
                    .change(AuditChange::Score {
                        score: result.score,
                        confidence: result.confidence,
                    }),
            );
        }
        _ => {}
    }

    if updated.stage == Stage::AIScreened && result.score >= shortlist_threshold {
        updated.stage = Stage::Shortlisted;
        outcome = ScreeningOutcome::Shortlisted;
        events.push(
            AuditEntry::new(
                Actor::system(),
                AuditAction::AutoShortlisted,
                target(application),
            )
            .notes(format!(
                "score {} meets shortlist threshold {}",
                result.score, shortlist_threshold
            ))
            .change(AuditChange::Stage {
                from: Some(Stage::AIScreened),
                to: Stage::Shortlisted,
            }),
        );
    }

    if events.is_empty() {
        return Ok(unchanged(application.clone()));
    }

    Ok(StageUpdate {
        application: updated,
        events,
        outcome,
    })
}

fn unchanged(application: Application) -> StageUpdate {
    StageUpdate {
        application,
        events: Vec::new(),
        outcome: ScreeningOutcome::Unchanged,
    }
}

/// Recruiter promotion of a screened application. Not an override: provenance is untouched.
pub fn shortlist(application: &Application, actor: &Actor) -> Result<StageUpdate, TransitionError> {
    let subject = format!("application {}", application.id);
    if !actor.is_human() {
        return Err(TransitionError::new(
            subject,
            application.stage,
            Stage::Shortlisted,
            "manual shortlisting requires a recruiter or admin",
        ));
    }
    if application.stage != Stage::AIScreened {
        return Err(TransitionError::new(
            subject,
            application.stage,
            Stage::Shortlisted,
            "only AI-screened applications can be shortlisted; use an override otherwise",
        ));
    }

    let mut updated = application.clone();
    updated.stage = Stage::Shortlisted;

    let event = AuditEntry::new(actor.clone(), AuditAction::Shortlisted, target(application))
        .notes(format!("shortlisted by {}", actor.id))
        .change(AuditChange::Stage {
            from: Some(Stage::AIScreened),
            to: Stage::Shortlisted,
        });

    Ok(StageUpdate {
        application: updated,
        events: vec![event],
        outcome: ScreeningOutcome::Shortlisted,
    })
}

/// Explicit human override to any other stage.
///
/// Terminal stages can only be reopened by an admin.
pub fn apply_override(
    application: &Application,
    to: Stage,
    actor: &Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<StageUpdate, TransitionError> {
    let subject = format!("application {}", application.id);
    let from = application.stage;

    if !actor.is_human() {
        return Err(TransitionError::new(
            subject,
            from,
            to,
            "overrides require a human actor",
        ));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(TransitionError::new(
            subject,
            from,
            to,
            "an override reason is required",
        ));
    }
    if from == to {
        return Err(TransitionError::new(
            subject,
            from,
            to,
            "application is already in that stage",
        ));
    }
    if from.is_terminal() && actor.role != ActorRole::Admin {
        return Err(TransitionError::new(
            subject,
            from,
            to,
            "terminal stage; only an admin override may reopen it",
        ));
    }

    let mut updated = application.clone();
    updated.stage = to;
    updated.provenance = DecisionProvenance::Human {
        actor: actor.clone(),
        reason: reason.to_string(),
        decided_at: now,
    };

    let event = AuditEntry::new(actor.clone(), AuditAction::OverrideRanking, target(application))
        .notes(reason)
        .change(AuditChange::Override { from, to });

    Ok(StageUpdate {
        application: updated,
        events: vec![event],
        outcome: ScreeningOutcome::Unchanged,
    })
}
