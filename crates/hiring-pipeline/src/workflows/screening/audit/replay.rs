use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{AuditChange, AuditEvent, AuditTarget};
use crate::workflows::screening::domain::{ApplicationId, Confidence, Stage};

/// Application state rebuilt purely from its audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationSnapshot {
    pub application_id: ApplicationId,
    pub stage: Stage,
    pub score: u8,
    pub confidence: Confidence,
    pub overridden: bool,
    pub events_applied: usize,
}

/// Replays every event for `application_id`.
pub fn replay_application(
    application_id: &ApplicationId,
    events: &[AuditEvent],
) -> Option<ApplicationSnapshot> {
    replay_until(application_id, events, None)
}

/// Replays events for `application_id` up to and including `until`.
///
/// Events are applied in log order regardless of input order, and an event seen twice (same
/// sequence number) is applied once, so replaying a replayed stream changes nothing.
pub fn replay_until(
    application_id: &ApplicationId,
    events: &[AuditEvent],
    until: Option<DateTime<Utc>>,
) -> Option<ApplicationSnapshot> {
    let target = AuditTarget::Application(application_id.clone());
    let mut relevant: Vec<&AuditEvent> = events
        .iter()
        .filter(|event| event.target == target)
        .filter(|event| until.map_or(true, |cutoff| event.timestamp <= cutoff))
        .collect();
    relevant.sort_by_key(|event| event.order_key());

    let mut seen = BTreeSet::new();
    let mut snapshot: Option<ApplicationSnapshot> = None;

    for event in relevant {
        if !seen.insert(event.sequence) {
            continue;
        }
        let Some(change) = &event.change else {
            continue;
        };

        let state = snapshot.get_or_insert_with(|| ApplicationSnapshot {
            application_id: application_id.clone(),
            stage: Stage::New,
            score: 0,
            confidence: Confidence::Low,
            overridden: false,
            events_applied: 0,
        });

        match change {
            AuditChange::Stage { to, .. } => state.stage = *to,
            AuditChange::Score { score, confidence } => {
                state.score = *score;
                state.confidence = *confidence;
            }
            AuditChange::StageAndScore {
                to,
                score,
                confidence,
                ..
            } => {
                state.stage = *to;
                state.score = *score;
                state.confidence = *confidence;
            }
            AuditChange::Override { to, .. } => {
                state.stage = *to;
                state.overridden = true;
            }
            AuditChange::JobStatus { .. } | AuditChange::Moderation { .. } => continue,
        }
        state.events_applied += 1;
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::screening::audit::{AuditAction, AuditEntry, AuditSequencer};
    use crate::workflows::screening::domain::Actor;
    use chrono::Duration;

    fn history(id: &ApplicationId) -> Vec<AuditEvent> {
        let target = AuditTarget::Application(id.clone());
        let start = Utc::now();
        let mut sequencer = AuditSequencer::default();
        let entries = vec![
            AuditEntry::new(Actor::system(), AuditAction::ApplicationReceived, target.clone())
                .change(AuditChange::StageAndScore {
                    from: None,
                    to: Stage::New,
                    score: 0,
                    confidence: Confidence::Low,
                }),
            AuditEntry::new(Actor::system(), AuditAction::AutomatedScreening, target.clone())
                .change(AuditChange::StageAndScore {
                    from: Some(Stage::New),
                    to: Stage::AIScreened,
                    score: 64,
                    confidence: Confidence::Normal,
                }),
            AuditEntry::new(
                Actor::recruiter("r-7"),
                AuditAction::OverrideRanking,
                target.clone(),
            )
            .change(AuditChange::Override {
                from: Stage::AIScreened,
                to: Stage::Shortlisted,
            }),
            AuditEntry::new(Actor::system(), AuditAction::OverridePreserved, target)
                .change(AuditChange::Score {
                    score: 12,
                    confidence: Confidence::Low,
                }),
        ];

        entries
            .into_iter()
            .enumerate()
            .map(|(offset, entry)| sequencer.stamp(entry, start + Duration::seconds(offset as i64)))
            .collect()
    }

    #[test]
    fn replay_rebuilds_stage_and_score() {
        let id = ApplicationId::from("app-replay");
        let events = history(&id);

        let snapshot = replay_application(&id, &events).expect("snapshot");
        assert_eq!(snapshot.stage, Stage::Shortlisted);
        assert_eq!(snapshot.score, 12);
        assert_eq!(snapshot.confidence, Confidence::Low);
        assert!(snapshot.overridden);
        assert_eq!(snapshot.events_applied, 4);
    }

    #[test]
    fn replay_is_order_and_duplicate_insensitive() {
        let id = ApplicationId::from("app-replay");
        let events = history(&id);
        let expected = replay_application(&id, &events);

        let mut shuffled = events.clone();
        shuffled.reverse();
        shuffled.extend(events.iter().cloned());

        assert_eq!(replay_application(&id, &shuffled), expected);
    }

    #[test]
    fn replay_until_reconstructs_earlier_state() {
        let id = ApplicationId::from("app-replay");
        let events = history(&id);

        let snapshot = replay_until(&id, &events, Some(events[1].timestamp)).expect("snapshot");
        assert_eq!(snapshot.stage, Stage::AIScreened);
        assert_eq!(snapshot.score, 64);
        assert!(!snapshot.overridden);
    }

    #[test]
    fn replay_ignores_other_targets() {
        let id = ApplicationId::from("app-replay");
        let events = history(&id);
        assert!(replay_application(&ApplicationId::from("someone-else"), &events).is_none());
    }
}
