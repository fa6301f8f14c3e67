use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::approval::JobDecision;
use super::audit::{export_csv, AuditLog, AuditTarget};
use super::domain::{
    Actor, ActorRole, ApplicationId, JobId, JobStatus, MessageId, SenderRole, Stage, ThreadId,
};
use super::repository::{Notifier, PipelineRepository, RepositoryError};
use super::service::{ApplicationSubmission, NewJob, PipelineError, PolicyUpdate, ScreeningService};
use super::views::{ApplicationView, JobView, ThreadView};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub status: JobStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenThreadRequest {
    pub application_id: ApplicationId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostMessageRequest {
    pub sender: SenderRole,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClearFlagRequest {
    pub reason: String,
}

type SharedService<R, L, N> = State<Arc<ScreeningService<R, L, N>>>;

/// Router builder exposing the screening pipeline over HTTP.
pub fn screening_router<R, L, N>(service: Arc<ScreeningService<R, L, N>>) -> Router
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route(
            "/api/v1/jobs",
            post(create_job_handler::<R, L, N>).get(list_jobs_handler::<R, L, N>),
        )
        .route("/api/v1/jobs/:job_id", get(job_handler::<R, L, N>))
        .route("/api/v1/jobs/:job_id/risk", get(job_risk_handler::<R, L, N>))
        .route(
            "/api/v1/jobs/:job_id/approval",
            post(submit_approval_handler::<R, L, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/decision",
            post(job_decision_handler::<R, L, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/status",
            post(job_status_handler::<R, L, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/applications",
            get(job_applications_handler::<R, L, N>),
        )
        .route(
            "/api/v1/applications",
            post(submit_application_handler::<R, L, N>),
        )
        .route(
            "/api/v1/applications/:application_id",
            get(application_handler::<R, L, N>),
        )
        .route(
            "/api/v1/applications/:application_id/rescore",
            post(rescore_handler::<R, L, N>),
        )
        .route(
            "/api/v1/applications/:application_id/shortlist",
            post(shortlist_handler::<R, L, N>),
        )
        .route(
            "/api/v1/applications/:application_id/override",
            post(override_handler::<R, L, N>),
        )
        .route(
            "/api/v1/applications/:application_id/audit",
            get(application_audit_handler::<R, L, N>),
        )
        .route(
            "/api/v1/applications/:application_id/replay",
            get(replay_handler::<R, L, N>),
        )
        .route("/api/v1/threads", post(open_thread_handler::<R, L, N>))
        .route("/api/v1/threads/:thread_id", get(thread_handler::<R, L, N>))
        .route(
            "/api/v1/threads/:thread_id/messages",
            post(post_message_handler::<R, L, N>),
        )
        .route(
            "/api/v1/threads/:thread_id/read",
            post(mark_read_handler::<R, L, N>),
        )
        .route(
            "/api/v1/messages/:message_id/clear-flag",
            post(clear_flag_handler::<R, L, N>),
        )
        .route(
            "/api/v1/policy",
            get(policy_handler::<R, L, N>).put(update_policy_handler::<R, L, N>),
        )
        .route("/api/v1/audit", get(audit_handler::<R, L, N>))
        .route("/api/v1/audit/export", get(audit_export_handler::<R, L, N>))
        .with_state(service)
}

/// Reads the acting user from `x-actor-id` / `x-actor-role`. Requests without an id act as
/// nobody and are refused; a missing role defaults to recruiter.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| bad_request(format!("missing {ACTOR_ID_HEADER} header")))?;

    let role = match headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        None => ActorRole::Recruiter,
        Some(raw) => ActorRole::parse(raw)
            .ok_or_else(|| bad_request(format!("unknown actor role '{raw}'")))?,
    };

    Ok(Actor {
        id: id.to_string(),
        role,
    })
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

impl PipelineError {
    /// HTTP status for a service failure; shared by the handlers and [`crate::error::AppError`].
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::ConflictingOverride { .. } => StatusCode::CONFLICT,
            PipelineError::Repository(RepositoryError::VersionConflict { .. })
            | PipelineError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            PipelineError::NotFound { .. }
            | PipelineError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            PipelineError::Repository(RepositoryError::Unavailable(_))
            | PipelineError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub(crate) fn error_response(error: PipelineError) -> Response {
    let status = error.status_code();
    let payload = json!({
        "error": error.to_string(),
    });
    (status, Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, PipelineError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_job_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Json(request): Json<NewJob>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        service
            .create_job(request, &actor)
            .map(|job| JobView::from(&job)),
    )
}

pub(crate) async fn list_jobs_handler<R, L, N>(State(service): SharedService<R, L, N>) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service
            .jobs()
            .map(|jobs| jobs.iter().map(JobView::from).collect::<Vec<_>>()),
    )
}

pub(crate) async fn job_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(job_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service.job(&JobId(job_id)).map(|job| JobView::from(&job)),
    )
}

pub(crate) async fn job_risk_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(job_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.assess_job_risk(&JobId(job_id)))
}

pub(crate) async fn submit_approval_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.submit_job_for_approval(&JobId(job_id), &actor),
    )
}

pub(crate) async fn job_decision_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(decision): Json<JobDecision>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service
            .decide_job(&JobId(job_id), decision, &actor)
            .map(|job| JobView::from(&job)),
    )
}

pub(crate) async fn job_status_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service
            .change_job_status(&JobId(job_id), request.status, &actor)
            .map(|job| JobView::from(&job)),
    )
}

pub(crate) async fn job_applications_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(job_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service
            .applications_for_job(&JobId(job_id))
            .map(|applications| {
                applications
                    .iter()
                    .map(ApplicationView::from)
                    .collect::<Vec<_>>()
            }),
    )
}

pub(crate) async fn submit_application_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Json(submission): Json<ApplicationSubmission>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    match service.submit_application(submission).await {
        Ok(report) => {
            let payload = json!({
                "application": ApplicationView::from(&report.application),
                "outcome": report.outcome,
            });
            (StatusCode::ACCEPTED, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn application_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(application_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service
            .application(&ApplicationId(application_id))
            .map(|application| ApplicationView::from(&application)),
    )
}

pub(crate) async fn rescore_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(application_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    match service
        .rescore_application(&ApplicationId(application_id))
        .await
    {
        Ok(report) => {
            let payload = json!({
                "application": ApplicationView::from(&report.application),
                "outcome": report.outcome,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn shortlist_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service
            .shortlist_application(&ApplicationId(application_id), &actor)
            .map(|application| ApplicationView::from(&application)),
    )
}

pub(crate) async fn override_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    Json(request): Json<OverrideRequest>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service
            .override_stage(
                &ApplicationId(application_id),
                request.stage,
                &request.reason,
                &actor,
            )
            .map(|application| ApplicationView::from(&application)),
    )
}

pub(crate) async fn application_audit_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(application_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let target = AuditTarget::Application(ApplicationId(application_id));
    respond(StatusCode::OK, service.audit_trail(&target))
}

pub(crate) async fn replay_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(application_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service.replay_application(&ApplicationId(application_id)),
    )
}

pub(crate) async fn open_thread_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Json(request): Json<OpenThreadRequest>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        service
            .open_thread(&request.application_id, &actor)
            .map(|thread| ThreadView::from(&thread)),
    )
}

pub(crate) async fn thread_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(thread_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service
            .thread(&ThreadId(thread_id))
            .map(|thread| ThreadView::from(&thread)),
    )
}

pub(crate) async fn post_message_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(thread_id): Path<String>,
    Json(request): Json<PostMessageRequest>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    match service
        .post_message(&ThreadId(thread_id), request.sender, &request.text)
        .await
    {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn mark_read_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    Path(thread_id): Path<String>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service
            .mark_thread_read(&ThreadId(thread_id))
            .map(|thread| ThreadView::from(&thread)),
    )
}

pub(crate) async fn clear_flag_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
    Json(request): Json<ClearFlagRequest>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.clear_message_flag(&MessageId(message_id), &request.reason, &actor),
    )
}

pub(crate) async fn policy_handler<R, L, N>(State(service): SharedService<R, L, N>) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    (StatusCode::OK, Json(service.policy())).into_response()
}

pub(crate) async fn update_policy_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
    headers: HeaderMap,
    Json(update): Json<PolicyUpdate>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.update_screening_policy(update, &actor),
    )
}

pub(crate) async fn audit_handler<R, L, N>(State(service): SharedService<R, L, N>) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.audit_events())
}

pub(crate) async fn audit_export_handler<R, L, N>(
    State(service): SharedService<R, L, N>,
) -> Response
where
    R: PipelineRepository + 'static,
    L: AuditLog + 'static,
    N: Notifier + 'static,
{
    let events = match service.audit_events() {
        Ok(events) => events,
        Err(error) => return error_response(error),
    };

    let mut buffer = Vec::new();
    if let Err(error) = export_csv(&events, &mut buffer) {
        let payload = json!({
            "error": error.to_string(),
        });
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        buffer,
    )
        .into_response()
}
