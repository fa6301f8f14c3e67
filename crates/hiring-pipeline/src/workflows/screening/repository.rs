use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{Application, ApplicationId, Job, JobId, MessageId, Thread, ThreadId};

/// Storage abstraction so the service module can be exercised in isolation.
///
/// Updates are optimistic: the record passed in must carry the version the caller read. A stale
/// version fails with [`RepositoryError::VersionConflict`]; on success the stored version is
/// bumped and the stored record returned. `discard_*` removes a record whose creation could not
/// be audited; discarding a missing record is not an error.
pub trait PipelineRepository: Send + Sync {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError>;
    fn update_job(&self, job: Job) -> Result<Job, RepositoryError>;
    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError>;
    fn jobs(&self) -> Result<Vec<Job>, RepositoryError>;
    fn discard_job(&self, id: &JobId) -> Result<(), RepositoryError>;

    fn insert_application(&self, application: Application) -> Result<Application, RepositoryError>;
    fn update_application(&self, application: Application) -> Result<Application, RepositoryError>;
    fn fetch_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError>;
    fn applications_for_job(&self, job_id: &JobId) -> Result<Vec<Application>, RepositoryError>;
    fn discard_application(&self, id: &ApplicationId) -> Result<(), RepositoryError>;

    fn insert_thread(&self, thread: Thread) -> Result<Thread, RepositoryError>;
    fn update_thread(&self, thread: Thread) -> Result<Thread, RepositoryError>;
    fn fetch_thread(&self, id: &ThreadId) -> Result<Option<Thread>, RepositoryError>;
    fn threads_for_job(&self, job_id: &JobId) -> Result<Vec<Thread>, RepositoryError>;
    fn thread_for_message(&self, id: &MessageId) -> Result<Option<Thread>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed concurrently (expected version {expected}, found {found})")]
    VersionConflict { expected: u64, found: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification hook (mailer, chat, webhook). Fire-and-forget from the pipeline's
/// point of view.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub template: String,
    pub subject_id: String,
    pub details: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(template: &str, subject_id: impl Into<String>) -> Self {
        Self {
            template: template.to_string(),
            subject_id: subject_id.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
