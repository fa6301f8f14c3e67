//! End-to-end scenarios through the public service facade, backed by the durable JSON-lines
//! audit log so replay and export are exercised against what actually hit disk.

use std::sync::Arc;

use hiring_pipeline::workflows::screening::{
    export_csv, read_events, replay_application, Actor, ApplicationId, ApplicationSubmission,
    AuditAction, AuditTarget, AutoApprovalOutcome, CandidateProfile, JobDecision, JobId,
    JobStatus, JsonlAuditLog, KeywordScorer, MemoryNotifier, MemoryRepository, NewJob,
    PhraseRuleFlagger, RiskLevel, ScreeningPolicy, ScreeningService, SenderRole, Stage,
};

type Service = ScreeningService<MemoryRepository, JsonlAuditLog, MemoryNotifier>;

fn service(audit: JsonlAuditLog) -> Service {
    ScreeningService::new(
        Arc::new(MemoryRepository::default()),
        Arc::new(audit),
        Arc::new(MemoryNotifier::default()),
        Arc::new(KeywordScorer),
        Arc::new(PhraseRuleFlagger::default()),
        ScreeningPolicy::default(),
    )
}

fn profile(name: &str, summary: &str) -> CandidateProfile {
    CandidateProfile {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        phone: None,
        summary: summary.to_string(),
    }
}

#[tokio::test]
async fn screening_moderation_and_approval_round_trip_through_the_audit_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit.jsonl");
    let service = service(JsonlAuditLog::open(&path).expect("audit log opens"));
    let recruiter = Actor::recruiter("rita");
    let admin = Actor::admin("ada");

    let job = service
        .create_job(
            NewJob {
                title: "Backend Engineer".to_string(),
                description: "Rust tokio axum postgres".to_string(),
            },
            &recruiter,
        )
        .expect("job created");
    let report = service
        .submit_job_for_approval(&job.id, &recruiter)
        .expect("submitted");
    assert_eq!(report.auto_approval, AutoApprovalOutcome::Approved);

    let strong = service
        .submit_application(ApplicationSubmission {
            job_id: job.id.clone(),
            candidate: profile(
                "Jo",
                &"Backend engineer writing Rust services with tokio axum and postgres. ".repeat(3),
            ),
        })
        .await
        .expect("intake");
    assert_eq!(strong.application.stage, Stage::Shortlisted);

    let weak = service
        .submit_application(ApplicationSubmission {
            job_id: job.id.clone(),
            candidate: profile("Max", "Graphic designer"),
        })
        .await
        .expect("intake");
    assert_eq!(weak.application.stage, Stage::AIScreened);

    let thread = service
        .open_thread(&weak.application.id, &recruiter)
        .expect("thread");
    let message = service
        .post_message(&thread.id, SenderRole::Candidate, "Can we talk off the record?")
        .await
        .expect("posted");
    assert!(message.flagged());

    service
        .override_stage(&weak.application.id, Stage::Rejected, "portfolio only", &recruiter)
        .expect("rejected");

    let risk = service.assess_job_risk(&job.id).expect("assessed");
    assert_eq!(risk.level, RiskLevel::High);

    service.pause_job(&job.id, &recruiter).expect("paused");
    let resumed = service.resume_job(&job.id, &recruiter).expect("resubmitted");
    assert_eq!(resumed.job.status, JobStatus::PendingApproval);
    assert!(matches!(
        resumed.auto_approval,
        AutoApprovalOutcome::AwaitingAdmin { .. }
    ));
    let reopened = service
        .decide_job(&job.id, JobDecision::Approve { note: None }, &admin)
        .expect("admin approves");
    assert_eq!(reopened.status, JobStatus::Open);

    let events = read_events(&path).expect("file readable");
    assert_eq!(events.len(), service.audit_events().expect("events").len());
    for (expected, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, expected as u64);
    }

    for application in [&strong.application, &weak.application] {
        let live = service.application(&application.id).expect("live");
        let replayed = replay_application(&application.id, &events).expect("replayed");
        assert_eq!(replayed.stage, live.stage);
        assert_eq!(replayed.score, live.score);
    }

    let mut csv = Vec::new();
    export_csv(&events, &mut csv).expect("export");
    let csv = String::from_utf8(csv).expect("utf8");
    assert!(csv.contains("Override ranking"));
    assert!(csv.contains("Approved job"));
}

#[tokio::test]
async fn reopened_audit_log_continues_numbering() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit.jsonl");

    {
        let service = service(JsonlAuditLog::open(&path).expect("audit log opens"));
        service
            .create_job(
                NewJob {
                    title: "Data Engineer".to_string(),
                    description: String::new(),
                },
                &Actor::recruiter("rita"),
            )
            .expect("job created");
    }

    let service = service(JsonlAuditLog::open(&path).expect("audit log reopens"));
    service
        .create_job(
            NewJob {
                title: "Site Reliability Engineer".to_string(),
                description: String::new(),
            },
            &Actor::recruiter("rita"),
        )
        .expect("job created");

    let sequences: Vec<u64> = read_events(&path)
        .expect("readable")
        .iter()
        .map(|event| event.sequence)
        .collect();
    assert_eq!(sequences, vec![0, 1]);
}

async fn open_and_apply(service: &Service, title: &str, candidate: &str) -> (JobId, ApplicationId) {
    let recruiter = Actor::recruiter("rita");
    let job = service
        .create_job(
            NewJob {
                title: title.to_string(),
                description: "rust services".to_string(),
            },
            &recruiter,
        )
        .expect("job created");
    service
        .submit_job_for_approval(&job.id, &recruiter)
        .expect("job submitted");
    let report = service
        .submit_application(ApplicationSubmission {
            job_id: job.id.clone(),
            candidate: profile(candidate, "Rust engineer shipping tokio services"),
        })
        .await
        .expect("application received");
    (job.id, report.application.id)
}

#[tokio::test]
async fn restarted_service_never_reuses_ids_from_the_audit_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit.jsonl");

    let (first_job, first_application) = {
        let service = service(JsonlAuditLog::open(&path).expect("audit log opens"));
        open_and_apply(&service, "Data Engineer", "Jo").await
    };
    let events_before_restart = read_events(&path).expect("readable").len();

    let service = service(JsonlAuditLog::open(&path).expect("audit log reopens"));
    let (job, application) = open_and_apply(&service, "Site Reliability Engineer", "Sam").await;
    assert_ne!(job, first_job);
    assert_ne!(application, first_application);

    let trail = service
        .audit_trail(&AuditTarget::Application(application.clone()))
        .expect("trail");
    assert_eq!(trail[0].action, AuditAction::ApplicationReceived);
    let job_trail = service
        .audit_trail(&AuditTarget::Job(job))
        .expect("job trail");
    assert_eq!(job_trail[0].action, AuditAction::JobCreated);
    assert!(trail
        .iter()
        .chain(job_trail.iter())
        .all(|event| event.sequence as usize >= events_before_restart));
    assert_eq!(
        service.replay_application(&application).expect("replay").stage,
        service.application(&application).expect("live").stage
    );
}
