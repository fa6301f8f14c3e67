use hiring_pipeline::config::{AiBackendConfig, AppConfig, AuditConfig, ScreeningBackend};
use hiring_pipeline::error::AppError;
use hiring_pipeline::workflows::screening::{
    AiBackendClient, AuditEntry, AuditError, AuditEvent, AuditLog, AuditTarget, Flagger,
    JsonlAuditLog, KeywordScorer, MemoryAuditLog, MemoryRepository, Notification, Notifier,
    NotifyError, PhraseRuleFlagger, Scorer, ScreeningService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type ServerService = ScreeningService<MemoryRepository, ConfiguredAuditLog, TracingNotifier>;

/// Audit log selected at startup: durable when `AUDIT_LOG_PATH` is set, in memory otherwise.
pub(crate) enum ConfiguredAuditLog {
    Memory(MemoryAuditLog),
    Jsonl(JsonlAuditLog),
}

impl ConfiguredAuditLog {
    pub(crate) fn from_config(config: &AuditConfig) -> Result<Self, AuditError> {
        match &config.log_path {
            Some(path) => {
                let log = JsonlAuditLog::open(path)?;
                info!(path = %log.path().display(), "audit trail persisted to disk");
                Ok(Self::Jsonl(log))
            }
            None => Ok(Self::Memory(MemoryAuditLog::default())),
        }
    }

    pub(crate) fn is_durable(&self) -> bool {
        matches!(self, Self::Jsonl(_))
    }
}

impl AuditLog for ConfiguredAuditLog {
    fn append_batch(&self, entries: Vec<AuditEntry>) -> Result<Vec<AuditEvent>, AuditError> {
        match self {
            Self::Memory(log) => log.append_batch(entries),
            Self::Jsonl(log) => log.append_batch(entries),
        }
    }

    fn events_for(&self, target: &AuditTarget) -> Result<Vec<AuditEvent>, AuditError> {
        match self {
            Self::Memory(log) => log.events_for(target),
            Self::Jsonl(log) => log.events_for(target),
        }
    }

    fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        match self {
            Self::Memory(log) => log.events(),
            Self::Jsonl(log) => log.events(),
        }
    }
}

/// Notifier for the HTTP service: hands notifications to the log stream.
#[derive(Default, Clone)]
pub(crate) struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            template = %notification.template,
            subject = %notification.subject_id,
            details = ?notification.details,
            "notification dispatched"
        );
        Ok(())
    }
}

pub(crate) fn screening_backends(
    config: &AiBackendConfig,
) -> Result<(Arc<dyn Scorer>, Arc<dyn Flagger>), AppError> {
    match config.backend {
        ScreeningBackend::Local => Ok((
            Arc::new(KeywordScorer),
            Arc::new(PhraseRuleFlagger::default()),
        )),
        ScreeningBackend::Remote => {
            let client = Arc::new(AiBackendClient::from_config(config)?);
            info!(base_url = %config.base_url, "using remote screening backend");
            let scorer: Arc<dyn Scorer> = client.clone();
            let flagger: Arc<dyn Flagger> = client;
            Ok((scorer, flagger))
        }
    }
}

pub(crate) fn build_service(config: &AppConfig) -> Result<Arc<ServerService>, AppError> {
    let audit = ConfiguredAuditLog::from_config(&config.audit)?;
    if !audit.is_durable() {
        info!("AUDIT_LOG_PATH unset; audit trail kept in memory only");
    }
    let (scorer, flagger) = screening_backends(&config.ai)?;

    let service = ScreeningService::new(
        Arc::new(MemoryRepository::default()),
        Arc::new(audit),
        Arc::new(TracingNotifier),
        scorer,
        flagger,
        config.screening,
    )
    .with_external_timeout(config.ai.timeout);

    Ok(Arc::new(service))
}
