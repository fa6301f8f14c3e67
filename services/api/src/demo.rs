use crate::infra::ConfiguredAuditLog;
use clap::Args;
use hiring_pipeline::config::AuditConfig;
use hiring_pipeline::error::AppError;
use hiring_pipeline::workflows::screening::{
    Actor, ApplicationSubmission, AutoApprovalOutcome, CandidateProfile, JobDecision,
    KeywordScorer, MemoryNotifier, MemoryRepository, ModerationStatus, NewJob, PhraseRuleFlagger,
    ScreeningPolicy, ScreeningService, SenderRole, Stage,
};
use std::path::PathBuf;
use std::sync::Arc;

type DemoService = ScreeningService<MemoryRepository, ConfiguredAuditLog, MemoryNotifier>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Also write the demo audit trail to this JSON-lines file.
    #[arg(long)]
    pub(crate) audit_log: Option<PathBuf>,
    /// Shortlist threshold used for the run (defaults to 75).
    #[arg(long)]
    pub(crate) shortlist_threshold: Option<u8>,
}

const CANDIDATES: [(&str, &str); 3] = [
    (
        "Jo Park",
        "Backend engineer shipping Rust services on tokio and axum, owns postgres migrations, \
         on-call for payment APIs, mentors juniors on async Rust and observability. Previously \
         built event-driven billing pipelines and led incident reviews across three teams.",
    ),
    (
        "Sam Ortiz",
        "Full-stack developer, mostly TypeScript, some Rust side projects with axum.",
    ),
    ("Max Weber", "Graphic designer"),
];

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let mut policy = ScreeningPolicy::default();
    if let Some(threshold) = args.shortlist_threshold {
        policy.shortlist_threshold = threshold.min(100);
    }
    let audit = ConfiguredAuditLog::from_config(&AuditConfig {
        log_path: args.audit_log.clone(),
    })?;
    let notifier = Arc::new(MemoryNotifier::default());
    let service: DemoService = ScreeningService::new(
        Arc::new(MemoryRepository::default()),
        Arc::new(audit),
        notifier.clone(),
        Arc::new(KeywordScorer),
        Arc::new(PhraseRuleFlagger::default()),
        policy,
    );
    let recruiter = Actor::recruiter("rita");
    let admin = Actor::admin("ada");

    println!("Hiring pipeline demo (shortlist threshold {})", policy.shortlist_threshold);

    let job = service.create_job(
        NewJob {
            title: "Senior Backend Engineer".to_string(),
            description: "Rust services on tokio and axum backed by postgres; payment APIs, \
                          on-call rotation, observability."
                .to_string(),
        },
        &recruiter,
    )?;
    let report = service.submit_job_for_approval(&job.id, &recruiter)?;
    println!(
        "- Job {} '{}' -> {} (risk {})",
        report.job.id, report.job.title, report.job.status, report.assessment.level
    );
    match &report.auto_approval {
        AutoApprovalOutcome::Approved => println!("  Auto-approved by {}", Actor::system()),
        AutoApprovalOutcome::AwaitingAdmin { reason } => println!("  Awaiting admin: {reason}"),
    }

    println!("\nCandidate intake");
    let mut applications = Vec::new();
    for (name, summary) in CANDIDATES {
        let screened = service
            .submit_application(ApplicationSubmission {
                job_id: job.id.clone(),
                candidate: CandidateProfile {
                    name: name.to_string(),
                    email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
                    phone: None,
                    summary: summary.to_string(),
                },
            })
            .await?;
        let application = &screened.application;
        println!(
            "- {} {}: score {} ({} confidence) -> {} [{:?}]",
            application.id,
            application.candidate.name,
            application.score,
            application.confidence.label(),
            application.stage,
            screened.outcome
        );
        applications.push(screened.application);
    }

    println!("\nCandidate messages");
    let weakest = &applications[applications.len() - 1];
    let thread = service.open_thread(&weakest.id, &recruiter)?;
    for (sender, text) in [
        (SenderRole::Recruiter, "Thanks for applying, could you share a portfolio link?"),
        (SenderRole::Candidate, "Sure. Easier if you WhatsApp me, the portal is slow."),
        (SenderRole::Candidate, "Also, is there an application fee I should pay?"),
    ] {
        let message = service.post_message(&thread.id, sender, text).await?;
        match message.flag_reason() {
            Some(reason) => println!("- [{}] flagged: {reason}", sender.label()),
            None => println!("- [{}] {}", sender.label(), moderation_label(&message.moderation)),
        }
    }
    let thread = service.mark_thread_read(&thread.id)?;
    println!(
        "  Thread {}: {} messages, {} flagged",
        thread.id,
        thread.messages.len(),
        thread.flagged_count()
    );

    println!("\nRecruiter override");
    let promote_to = if applications[1].stage == Stage::Shortlisted {
        Stage::Hired
    } else {
        Stage::Shortlisted
    };
    let overridden = service.override_stage(
        &applications[1].id,
        promote_to,
        "hiring manager wants a conversation",
        &recruiter,
    )?;
    println!(
        "- {} -> {} (override: {})",
        overridden.id,
        overridden.stage,
        overridden.override_reason().unwrap_or("-")
    );
    let rescored = service.rescore_application(&overridden.id).await?;
    println!(
        "  Automated rescore: score {} stage {} [{:?}]",
        rescored.application.score, rescored.application.stage, rescored.outcome
    );
    service.override_stage(&weakest.id, Stage::Rejected, "no backend experience", &recruiter)?;

    println!("\nRisk and approval");
    let assessment = service.assess_job_risk(&job.id)?;
    println!(
        "- Risk {}: {} flagged messages, {}/{} low-confidence applications ({:.0}%)",
        assessment.level,
        assessment.signals.flagged_messages,
        assessment.signals.low_confidence_applications,
        assessment.signals.total_applications,
        assessment.signals.low_confidence_ratio * 100.0
    );
    service.pause_job(&job.id, &recruiter)?;
    let resubmitted = service.resume_job(&job.id, &recruiter)?;
    match &resubmitted.auto_approval {
        AutoApprovalOutcome::Approved => println!("- Reopened automatically"),
        AutoApprovalOutcome::AwaitingAdmin { reason } => {
            println!("- Resubmission held for admin: {reason}");
            let reopened = service.decide_job(
                &job.id,
                JobDecision::Approve {
                    note: Some("flags reviewed with the candidate".to_string()),
                },
                &admin,
            )?;
            println!("  {} approved; job is {}", admin, reopened.status);
        }
    }

    println!("\nNotifications");
    for notification in notifier.sent() {
        println!("- {} -> {}", notification.template, notification.subject_id);
    }

    println!("\nAudit trail");
    for event in service.audit_events()? {
        let notes = if event.notes.is_empty() {
            String::new()
        } else {
            format!(" | {}", event.notes)
        };
        println!(
            "{:>4} {} {} {} {}{}",
            event.sequence,
            event.timestamp.format("%H:%M:%S%.3f"),
            event.actor,
            event.action,
            event.target,
            notes
        );
    }

    for application in &applications {
        let live = service.application(&application.id)?;
        let replayed = service.replay_application(&application.id)?;
        let verdict = if replayed.stage == live.stage && replayed.score == live.score {
            "matches"
        } else {
            "DIVERGES from"
        };
        println!(
            "Replay of {} {verdict} live state ({})",
            application.id, live.stage
        );
    }

    if let Some(path) = args.audit_log {
        println!("\nAudit log written to {}", path.display());
    }
    Ok(())
}

fn moderation_label(status: &ModerationStatus) -> &'static str {
    match status {
        ModerationStatus::Unscanned => "unscanned",
        ModerationStatus::Clean => "clean",
        ModerationStatus::Unverified => "unverified (moderation unavailable)",
        ModerationStatus::Flagged { .. } => "flagged",
        ModerationStatus::Cleared { .. } => "cleared",
    }
}
