use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::workflows::screening::audit::{
    AuditAction, AuditEntry, AuditError, AuditEvent, AuditLog, AuditTarget,
};
use crate::workflows::screening::domain::{
    Actor, Application, ApplicationId, CandidateProfile, Confidence, Job, JobId, JobStatus,
    MessageId, Stage, Thread, ThreadId,
};
use crate::workflows::screening::moderation::{ClassificationError, Flagger, Verdict};
use crate::workflows::screening::repository::{
    Notification, Notifier, NotifyError, PipelineRepository, RepositoryError,
};
use crate::workflows::screening::scoring::{ScoreResult, Scorer, ScoringError};
use crate::workflows::screening::service::{ApplicationSubmission, NewJob, ScreeningService};
use crate::workflows::screening::{
    screening_router, MemoryAuditLog, MemoryNotifier, MemoryRepository, PhraseRuleFlagger,
    ScreeningPolicy,
};

pub(super) type TestService =
    ScreeningService<MemoryRepository, ControlledAuditLog, MemoryNotifier>;

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) repository: Arc<MemoryRepository>,
    pub(super) audit: Arc<ControlledAuditLog>,
    pub(super) notifier: Arc<MemoryNotifier>,
}

pub(super) fn harness(scorer: Arc<dyn Scorer>) -> Harness {
    harness_with(scorer, Arc::new(PhraseRuleFlagger::default()))
}

pub(super) fn harness_with(scorer: Arc<dyn Scorer>, flagger: Arc<dyn Flagger>) -> Harness {
    let repository = Arc::new(MemoryRepository::default());
    let audit = Arc::new(ControlledAuditLog::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let service = ScreeningService::new(
        repository.clone(),
        audit.clone(),
        notifier.clone(),
        scorer,
        flagger,
        ScreeningPolicy::default(),
    )
    .with_external_timeout(Duration::from_millis(200));

    Harness {
        service: Arc::new(service),
        repository,
        audit,
        notifier,
    }
}

pub(super) fn recruiter() -> Actor {
    Actor::recruiter("rita")
}

pub(super) fn admin() -> Actor {
    Actor::admin("ada")
}

pub(super) fn candidate(name: &str) -> CandidateProfile {
    CandidateProfile {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_ascii_lowercase().replace(' ', ".")),
        phone: None,
        summary: "Rust engineer with tokio and axum services in production".to_string(),
    }
}

/// Creates a job and takes it through approval; with no signals the default policy auto-approves.
pub(super) fn open_job(service: &TestService) -> Job {
    let job = service
        .create_job(
            NewJob {
                title: "Backend Engineer".to_string(),
                description: "Rust, tokio, axum, postgres".to_string(),
            },
            &recruiter(),
        )
        .expect("job created");
    let report = service
        .submit_job_for_approval(&job.id, &recruiter())
        .expect("submitted");
    assert_eq!(report.job.status, JobStatus::Open);
    report.job
}

pub(super) fn submission(job_id: &JobId, name: &str) -> ApplicationSubmission {
    ApplicationSubmission {
        job_id: job_id.clone(),
        candidate: candidate(name),
    }
}

/// Returns the queued results in order, then repeats the last one.
pub(super) struct ScriptedScorer {
    results: Mutex<Vec<ScoreResult>>,
    calls: AtomicUsize,
}

impl ScriptedScorer {
    pub(super) fn new(results: Vec<ScoreResult>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results),
            calls: AtomicUsize::new(0),
        })
    }

    pub(super) fn fixed(score: u32, confidence: Confidence) -> Arc<Self> {
        Self::new(vec![ScoreResult::new(score, confidence)])
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scorer for ScriptedScorer {
    async fn score(
        &self,
        _candidate: &CandidateProfile,
        _job: &Job,
    ) -> Result<ScoreResult, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().expect("scorer mutex poisoned");
        if results.len() > 1 {
            Ok(results.remove(0))
        } else {
            results
                .first()
                .copied()
                .ok_or_else(|| ScoringError::ScoringUnavailable("no scripted result".to_string()))
        }
    }

    fn backend(&self) -> &'static str {
        "scripted"
    }
}

pub(super) struct FailingScorer;

#[async_trait]
impl Scorer for FailingScorer {
    async fn score(
        &self,
        _candidate: &CandidateProfile,
        _job: &Job,
    ) -> Result<ScoreResult, ScoringError> {
        Err(ScoringError::ScoringUnavailable("backend returned 503".to_string()))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

pub(super) struct SlowScorer(pub(super) Duration);

#[async_trait]
impl Scorer for SlowScorer {
    async fn score(
        &self,
        _candidate: &CandidateProfile,
        _job: &Job,
    ) -> Result<ScoreResult, ScoringError> {
        tokio::time::sleep(self.0).await;
        Ok(ScoreResult::new(99, Confidence::Normal))
    }

    fn backend(&self) -> &'static str {
        "slow"
    }
}

/// Lands a human override through the service while the score is being computed, the way a
/// recruiter acting in parallel would.
pub(super) struct RacingOverrideScorer {
    pub(super) service: Mutex<Option<Weak<TestService>>>,
    pub(super) target: Mutex<Option<ApplicationId>>,
    pub(super) result: ScoreResult,
}

impl RacingOverrideScorer {
    pub(super) fn new(result: ScoreResult) -> Arc<Self> {
        Arc::new(Self {
            service: Mutex::new(None),
            target: Mutex::new(None),
            result,
        })
    }

    pub(super) fn attach(&self, service: &Arc<TestService>) {
        *self.service.lock().expect("service mutex poisoned") = Some(Arc::downgrade(service));
    }

    pub(super) fn race_on(&self, id: &ApplicationId) {
        *self.target.lock().expect("target mutex poisoned") = Some(id.clone());
    }
}

#[async_trait]
impl Scorer for RacingOverrideScorer {
    async fn score(
        &self,
        _candidate: &CandidateProfile,
        _job: &Job,
    ) -> Result<ScoreResult, ScoringError> {
        let target = self.target.lock().expect("target mutex poisoned").take();
        let service = self
            .service
            .lock()
            .expect("service mutex poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        if let (Some(id), Some(service)) = (target, service) {
            service
                .override_stage(&id, Stage::Rejected, "withdrew by email", &recruiter())
                .expect("override applies");
        }
        Ok(self.result)
    }

    fn backend(&self) -> &'static str {
        "racing"
    }
}

pub(super) struct FailingFlagger;

#[async_trait]
impl Flagger for FailingFlagger {
    async fn classify(&self, _text: &str) -> Result<Verdict, ClassificationError> {
        Err(ClassificationError::ClassificationUnavailable(
            "moderation model offline".to_string(),
        ))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

pub(super) struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp relay down".to_string()))
    }
}

type AppendHook = Box<dyn FnOnce(&AuditEntry) + Send>;

/// In-memory audit log that can be switched off, or made to run a hook just before the batch
/// carrying a given action is stored.
#[derive(Default)]
pub(super) struct ControlledAuditLog {
    inner: MemoryAuditLog,
    failing: AtomicBool,
    hook: Mutex<Option<(AuditAction, AppendHook)>>,
}

impl ControlledAuditLog {
    pub(super) fn fail_appends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Runs `hook` once, on the first batch containing `action`.
    pub(super) fn before_append(
        &self,
        action: AuditAction,
        hook: impl FnOnce(&AuditEntry) + Send + 'static,
    ) {
        *self.hook.lock().expect("hook mutex poisoned") = Some((action, Box::new(hook)));
    }
}

impl AuditLog for ControlledAuditLog {
    fn append_batch(&self, entries: Vec<AuditEntry>) -> Result<Vec<AuditEvent>, AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("audit store offline".to_string()));
        }
        let armed = {
            let mut slot = self.hook.lock().expect("hook mutex poisoned");
            match slot.as_ref() {
                Some((action, _)) if entries.iter().any(|entry| entry.action == *action) => {
                    slot.take()
                }
                _ => None,
            }
        };
        if let Some((action, hook)) = armed {
            if let Some(entry) = entries.iter().find(|entry| entry.action == action) {
                hook(entry);
            }
        }
        self.inner.append_batch(entries)
    }

    fn events_for(&self, target: &AuditTarget) -> Result<Vec<AuditEvent>, AuditError> {
        self.inner.events_for(target)
    }

    fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        self.inner.events()
    }
}

pub(super) struct UnavailableRepository;

impl PipelineRepository for UnavailableRepository {
    fn insert_job(&self, _job: Job) -> Result<Job, RepositoryError> {
        Err(offline())
    }

    fn update_job(&self, _job: Job) -> Result<Job, RepositoryError> {
        Err(offline())
    }

    fn fetch_job(&self, _id: &JobId) -> Result<Option<Job>, RepositoryError> {
        Err(offline())
    }

    fn jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        Err(offline())
    }

    fn discard_job(&self, _id: &JobId) -> Result<(), RepositoryError> {
        Err(offline())
    }

    fn insert_application(&self, _application: Application) -> Result<Application, RepositoryError> {
        Err(offline())
    }

    fn update_application(&self, _application: Application) -> Result<Application, RepositoryError> {
        Err(offline())
    }

    fn fetch_application(&self, _id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Err(offline())
    }

    fn applications_for_job(&self, _job_id: &JobId) -> Result<Vec<Application>, RepositoryError> {
        Err(offline())
    }

    fn discard_application(&self, _id: &ApplicationId) -> Result<(), RepositoryError> {
        Err(offline())
    }

    fn insert_thread(&self, _thread: Thread) -> Result<Thread, RepositoryError> {
        Err(offline())
    }

    fn update_thread(&self, _thread: Thread) -> Result<Thread, RepositoryError> {
        Err(offline())
    }

    fn fetch_thread(&self, _id: &ThreadId) -> Result<Option<Thread>, RepositoryError> {
        Err(offline())
    }

    fn threads_for_job(&self, _job_id: &JobId) -> Result<Vec<Thread>, RepositoryError> {
        Err(offline())
    }

    fn thread_for_message(&self, _id: &MessageId) -> Result<Option<Thread>, RepositoryError> {
        Err(offline())
    }
}

fn offline() -> RepositoryError {
    RepositoryError::Unavailable("database offline".to_string())
}

/// Repository whose application updates always lose the version race.
#[derive(Default)]
pub(super) struct ContendedRepository {
    pub(super) inner: MemoryRepository,
    pub(super) update_attempts: AtomicUsize,
}

impl PipelineRepository for ContendedRepository {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.inner.insert_job(job)
    }

    fn update_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.inner.update_job(job)
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        self.inner.fetch_job(id)
    }

    fn jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        self.inner.jobs()
    }

    fn discard_job(&self, id: &JobId) -> Result<(), RepositoryError> {
        self.inner.discard_job(id)
    }

    fn insert_application(&self, application: Application) -> Result<Application, RepositoryError> {
        self.inner.insert_application(application)
    }

    fn update_application(&self, application: Application) -> Result<Application, RepositoryError> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        Err(RepositoryError::VersionConflict {
            expected: application.version,
            found: application.version + 1,
        })
    }

    fn fetch_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.inner.fetch_application(id)
    }

    fn applications_for_job(&self, job_id: &JobId) -> Result<Vec<Application>, RepositoryError> {
        self.inner.applications_for_job(job_id)
    }

    fn discard_application(&self, id: &ApplicationId) -> Result<(), RepositoryError> {
        self.inner.discard_application(id)
    }

    fn insert_thread(&self, thread: Thread) -> Result<Thread, RepositoryError> {
        self.inner.insert_thread(thread)
    }

    fn update_thread(&self, thread: Thread) -> Result<Thread, RepositoryError> {
        self.inner.update_thread(thread)
    }

    fn fetch_thread(&self, id: &ThreadId) -> Result<Option<Thread>, RepositoryError> {
        self.inner.fetch_thread(id)
    }

    fn threads_for_job(&self, job_id: &JobId) -> Result<Vec<Thread>, RepositoryError> {
        self.inner.threads_for_job(job_id)
    }

    fn thread_for_message(&self, id: &MessageId) -> Result<Option<Thread>, RepositoryError> {
        self.inner.thread_for_message(id)
    }
}

pub(super) fn router_for(service: Arc<TestService>) -> axum::Router {
    screening_router(service)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 64)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
