use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::workflows::screening::audit::{
    AuditEntry, AuditError, AuditEvent, AuditLog, AuditSequencer, AuditTarget,
};
use crate::workflows::screening::domain::{
    Application, ApplicationId, Job, JobId, MessageId, Thread, ThreadId,
};
use crate::workflows::screening::repository::{
    Notification, Notifier, NotifyError, PipelineRepository, RepositoryError,
};

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, Job>,
    applications: HashMap<ApplicationId, Application>,
    threads: HashMap<ThreadId, Thread>,
}

/// In-process repository with per-record version checks.
#[derive(Default, Clone)]
pub struct MemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRepository {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }
}

trait Versioned {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

macro_rules! versioned {
    ($($ty:ty),*) => {
        $(impl Versioned for $ty {
            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        })*
    };
}

versioned!(Job, Application, Thread);

fn insert_record<K, V>(table: &mut HashMap<K, V>, key: K, mut record: V) -> Result<V, RepositoryError>
where
    K: std::hash::Hash + Eq,
    V: Versioned + Clone,
{
    if table.contains_key(&key) {
        return Err(RepositoryError::Conflict);
    }
    record.set_version(1);
    table.insert(key, record.clone());
    Ok(record)
}

fn update_record<K, V>(table: &mut HashMap<K, V>, key: &K, mut record: V) -> Result<V, RepositoryError>
where
    K: std::hash::Hash + Eq,
    V: Versioned + Clone,
{
    let stored = table.get_mut(key).ok_or(RepositoryError::NotFound)?;
    if stored.version() != record.version() {
        return Err(RepositoryError::VersionConflict {
            expected: record.version(),
            found: stored.version(),
        });
    }
    record.set_version(record.version() + 1);
    *stored = record.clone();
    Ok(record)
}

impl PipelineRepository for MemoryRepository {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        let mut tables = self.lock()?;
        insert_record(&mut tables.jobs, job.id.clone(), job)
    }

    fn update_job(&self, job: Job) -> Result<Job, RepositoryError> {
        let mut tables = self.lock()?;
        let key = job.id.clone();
        update_record(&mut tables.jobs, &key, job)
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    fn jobs(&self) -> Result<Vec<Job>, RepositoryError> {
        let mut jobs: Vec<Job> = self.lock()?.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    fn discard_job(&self, id: &JobId) -> Result<(), RepositoryError> {
        self.lock()?.jobs.remove(id);
        Ok(())
    }

    fn insert_application(&self, application: Application) -> Result<Application, RepositoryError> {
        let mut tables = self.lock()?;
        insert_record(&mut tables.applications, application.id.clone(), application)
    }

    fn update_application(&self, application: Application) -> Result<Application, RepositoryError> {
        let mut tables = self.lock()?;
        let key = application.id.clone();
        update_record(&mut tables.applications, &key, application)
    }

    fn fetch_application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock()?.applications.get(id).cloned())
    }

    fn applications_for_job(&self, job_id: &JobId) -> Result<Vec<Application>, RepositoryError> {
        let mut applications: Vec<Application> = self
            .lock()?
            .applications
            .values()
            .filter(|application| &application.job_id == job_id)
            .cloned()
            .collect();
        applications.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(applications)
    }

    fn discard_application(&self, id: &ApplicationId) -> Result<(), RepositoryError> {
        self.lock()?.applications.remove(id);
        Ok(())
    }

    fn insert_thread(&self, thread: Thread) -> Result<Thread, RepositoryError> {
        let mut tables = self.lock()?;
        insert_record(&mut tables.threads, thread.id.clone(), thread)
    }

    fn update_thread(&self, thread: Thread) -> Result<Thread, RepositoryError> {
        let mut tables = self.lock()?;
        let key = thread.id.clone();
        update_record(&mut tables.threads, &key, thread)
    }

    fn fetch_thread(&self, id: &ThreadId) -> Result<Option<Thread>, RepositoryError> {
        Ok(self.lock()?.threads.get(id).cloned())
    }

    fn threads_for_job(&self, job_id: &JobId) -> Result<Vec<Thread>, RepositoryError> {
        let mut threads: Vec<Thread> = self
            .lock()?
            .threads
            .values()
            .filter(|thread| &thread.job_id == job_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(threads)
    }

    fn thread_for_message(&self, id: &MessageId) -> Result<Option<Thread>, RepositoryError> {
        Ok(self
            .lock()?
            .threads
            .values()
            .find(|thread| thread.message(id).is_some())
            .cloned())
    }
}

/// In-process audit log.
#[derive(Default, Clone)]
pub struct MemoryAuditLog {
    inner: Arc<Mutex<(AuditSequencer, Vec<AuditEvent>)>>,
}

impl AuditLog for MemoryAuditLog {
    fn append_batch(&self, entries: Vec<AuditEntry>) -> Result<Vec<AuditEvent>, AuditError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| AuditError::Unavailable("audit mutex poisoned".to_string()))?;
        let (sequencer, events) = &mut *guard;
        let now = Utc::now();
        let stamped: Vec<AuditEvent> = entries
            .into_iter()
            .map(|entry| sequencer.stamp(entry, now))
            .collect();
        events.extend(stamped.iter().cloned());
        Ok(stamped)
    }

    fn events_for(&self, target: &AuditTarget) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self
            .events()?
            .into_iter()
            .filter(|event| &event.target == target)
            .collect())
    }

    fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| AuditError::Unavailable("audit mutex poisoned".to_string()))?;
        Ok(guard.1.clone())
    }
}

/// Notifier that keeps what it was sent; used by the demo and the local server.
#[derive(Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Transport("notifier mutex poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}
