use super::common::*;
use std::sync::Arc;

use crate::workflows::screening::audit::{AuditAction, AuditChange, AuditTarget};
use crate::workflows::screening::domain::{Confidence, ModerationStatus, SenderRole, Thread};
use crate::workflows::screening::service::PipelineError;
use crate::workflows::screening::AuditLog;

async fn thread_for_candidate(harness: &Harness) -> Thread {
    let job = open_job(&harness.service);
    let report = harness
        .service
        .submit_application(submission(&job.id, "Jo Park"))
        .await
        .expect("intake");
    harness
        .service
        .open_thread(&report.application.id, &recruiter())
        .expect("thread opens")
}

#[tokio::test]
async fn flagged_messages_carry_reason_and_audit_event() {
    let harness = harness(ScriptedScorer::fixed(50, Confidence::Normal));
    let thread = thread_for_candidate(&harness).await;

    let message = harness
        .service
        .post_message(
            &thread.id,
            SenderRole::Candidate,
            "Easier if you WhatsApp me, the portal is slow",
        )
        .await
        .expect("posted");

    assert!(message.flagged());
    assert_eq!(
        message.flag_reason(),
        Some("off-platform contact: \"whatsapp me\"")
    );

    let events = harness
        .audit
        .events_for(&AuditTarget::Message(message.id.clone()))
        .expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::MessageFlagged);
    assert_eq!(events[0].change, Some(AuditChange::Moderation { flagged: true }));

    let stored = harness.service.thread(&thread.id).expect("thread");
    assert_eq!(stored.flagged_count(), 1);
    assert_eq!(stored.unread, 1);
}

#[tokio::test]
async fn clean_messages_leave_no_audit_trace() {
    let harness = harness(ScriptedScorer::fixed(50, Confidence::Normal));
    let thread = thread_for_candidate(&harness).await;

    let message = harness
        .service
        .post_message(&thread.id, SenderRole::Recruiter, "Are you free on Thursday?")
        .await
        .expect("posted");

    assert_eq!(message.moderation, ModerationStatus::Clean);
    assert!(harness
        .audit
        .events_for(&AuditTarget::Message(message.id))
        .expect("events")
        .is_empty());
    assert_eq!(harness.service.thread(&thread.id).expect("thread").unread, 0);
}

#[tokio::test]
async fn flagger_outage_stores_unflagged_and_records_gap() {
    let harness = harness_with(
        ScriptedScorer::fixed(50, Confidence::Normal),
        Arc::new(FailingFlagger),
    );
    let thread = thread_for_candidate(&harness).await;

    let message = harness
        .service
        .post_message(&thread.id, SenderRole::Candidate, "send money to this account")
        .await
        .expect("posting is not blocked by moderation");

    assert!(!message.flagged());
    assert_eq!(message.moderation, ModerationStatus::Unverified);
    let events = harness
        .audit
        .events_for(&AuditTarget::Message(message.id))
        .expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::ModerationDegraded);
    assert_eq!(events[0].actor.id, "system");
}

#[tokio::test]
async fn flags_clear_only_through_human_override() {
    let harness = harness(ScriptedScorer::fixed(50, Confidence::Normal));
    let thread = thread_for_candidate(&harness).await;
    let message = harness
        .service
        .post_message(&thread.id, SenderRole::Candidate, "Is there a registration fee?")
        .await
        .expect("posted");
    assert!(message.flagged());

    let err = harness
        .service
        .clear_message_flag(&message.id, "   ", &recruiter())
        .expect_err("reason required");
    assert!(matches!(err, PipelineError::InvalidTransition(_)));
    let err = harness
        .service
        .clear_message_flag(&message.id, "asking about us", &crate::workflows::screening::Actor::system())
        .expect_err("automation cannot clear");
    assert!(matches!(err, PipelineError::InvalidTransition(_)));
    assert!(harness
        .service
        .thread(&thread.id)
        .expect("thread")
        .message(&message.id)
        .expect("present")
        .flagged());

    let cleared = harness
        .service
        .clear_message_flag(&message.id, "candidate asking whether we charge fees", &admin())
        .expect("admin clears");
    assert!(!cleared.flagged());
    assert!(matches!(
        cleared.moderation,
        ModerationStatus::Cleared { ref cleared_by, .. } if cleared_by == &admin()
    ));

    let events = harness
        .audit
        .events_for(&AuditTarget::Message(message.id.clone()))
        .expect("events");
    let last = events.last().expect("events present");
    assert_eq!(last.action, AuditAction::FlagCleared);
    assert!(last.notes.starts_with("override:"));
    assert_eq!(last.actor, admin());

    let err = harness
        .service
        .clear_message_flag(&message.id, "again", &admin())
        .expect_err("already cleared");
    assert!(matches!(err, PipelineError::InvalidTransition(_)));
}

#[tokio::test]
async fn unread_counter_resets_on_read() {
    let harness = harness(ScriptedScorer::fixed(50, Confidence::Normal));
    let thread = thread_for_candidate(&harness).await;
    for text in ["Hello", "Following up", "Any news?"] {
        harness
            .service
            .post_message(&thread.id, SenderRole::Candidate, text)
            .await
            .expect("posted");
    }
    assert_eq!(harness.service.thread(&thread.id).expect("thread").unread, 3);

    let read = harness.service.mark_thread_read(&thread.id).expect("read");
    assert_eq!(read.unread, 0);
    assert_eq!(read.messages.len(), 3);
}

#[tokio::test]
async fn opening_a_thread_twice_returns_the_same_thread() {
    let harness = harness(ScriptedScorer::fixed(50, Confidence::Normal));
    let thread = thread_for_candidate(&harness).await;
    let again = harness
        .service
        .open_thread(&thread.application_id, &recruiter())
        .expect("opens");
    assert_eq!(again.id, thread.id);
}

#[tokio::test]
async fn blank_messages_are_rejected() {
    let harness = harness(ScriptedScorer::fixed(50, Confidence::Normal));
    let thread = thread_for_candidate(&harness).await;
    let err = harness
        .service
        .post_message(&thread.id, SenderRole::Recruiter, "  \n ")
        .await
        .expect_err("empty text");
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn refused_audit_append_drops_flagged_message() {
    let harness = harness(ScriptedScorer::fixed(50, Confidence::Normal));
    let thread = thread_for_candidate(&harness).await;

    harness.audit.fail_appends(true);
    let err = harness
        .service
        .post_message(
            &thread.id,
            SenderRole::Candidate,
            "Easier if you WhatsApp me, the portal is slow",
        )
        .await
        .expect_err("flag cannot be audited");
    assert!(matches!(err, PipelineError::Audit(_)));

    let stored = harness.service.thread(&thread.id).expect("thread");
    assert!(stored.messages.is_empty());
    assert_eq!(stored.unread, 0);
    assert_eq!(stored.flagged_count(), 0);
}
