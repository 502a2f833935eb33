use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use super::domain::{AbsenceId, AbsenceType, ProviderId, ReplacementId, StaffId};
use super::repository::{
    AbsenceRepository, AbsenceStatusView, BookingStore, NotificationDispatcher, ProviderDirectory,
    ReplacementRepository, ReplacementStatusView, RepositoryError,
};
use super::search::AssignmentOutcome;
use super::service::{AbsenceWorkflowError, AbsenceWorkflowService};

/// Router builder exposing the absence and replacement endpoints.
pub fn absence_router<A, R, B, P, N>(service: Arc<AbsenceWorkflowService<A, R, B, P, N>>) -> Router
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    Router::new()
        .route("/api/v1/absences", post(declare_handler::<A, R, B, P, N>))
        .route(
            "/api/v1/absences/:absence_id",
            get(absence_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/absences/:absence_id/approve",
            post(approve_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/absences/:absence_id/reject",
            post(reject_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/absences/:absence_id/cancel",
            post(cancel_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/absences/:absence_id/activate",
            post(activate_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/replacements/:replacement_id",
            get(replacement_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/replacements/:replacement_id/search",
            post(search_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/replacements/:replacement_id/accept",
            post(accept_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/replacements/:replacement_id/reject",
            post(reject_proposal_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/replacements/:replacement_id/confirm",
            post(confirm_handler::<A, R, B, P, N>),
        )
        .route(
            "/api/v1/replacements/:replacement_id/decline",
            post(decline_handler::<A, R, B, P, N>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeclareAbsenceRequest {
    pub provider_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub kind: AbsenceType,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApproveRequest {
    pub approver: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectRequest {
    pub approver: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

fn error_response(error: AbsenceWorkflowError) -> Response {
    let status = match &error {
        AbsenceWorkflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AbsenceWorkflowError::Conflict(_)
        | AbsenceWorkflowError::State { .. }
        | AbsenceWorkflowError::ConcurrentModification(_)
        | AbsenceWorkflowError::Transition(_) => StatusCode::CONFLICT,
        AbsenceWorkflowError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        AbsenceWorkflowError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        AbsenceWorkflowError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}

async fn declare_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    axum::Json(request): axum::Json<DeclareAbsenceRequest>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    match service.declare_absence(
        ProviderId(request.provider_id),
        request.start_date,
        request.end_date,
        request.kind,
        request.reason,
    ) {
        Ok(absence) => (
            StatusCode::CREATED,
            axum::Json(AbsenceStatusView::from_absence(&absence)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn absence_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(absence_id): Path<String>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    match service.absence(&AbsenceId(absence_id)) {
        Ok(absence) => (
            StatusCode::OK,
            axum::Json(AbsenceStatusView::from_absence(&absence)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn approve_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(absence_id): Path<String>,
    axum::Json(request): axum::Json<ApproveRequest>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now().naive_utc();
    match service.approve(&AbsenceId(absence_id), StaffId(request.approver), now) {
        Ok(absence) => (
            StatusCode::OK,
            axum::Json(AbsenceStatusView::from_absence(&absence)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn reject_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(absence_id): Path<String>,
    axum::Json(request): axum::Json<RejectRequest>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now().naive_utc();
    match service.reject(
        &AbsenceId(absence_id),
        StaffId(request.approver),
        request.reason,
        now,
    ) {
        Ok(absence) => (
            StatusCode::OK,
            axum::Json(AbsenceStatusView::from_absence(&absence)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn cancel_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(absence_id): Path<String>,
    axum::Json(request): axum::Json<CancelRequest>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now().naive_utc();
    match service.cancel(&AbsenceId(absence_id), request.reason, now) {
        Ok(absence) => (
            StatusCode::OK,
            axum::Json(AbsenceStatusView::from_absence(&absence)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn activate_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(absence_id): Path<String>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let today = Utc::now().date_naive();
    match service.activate(&AbsenceId(absence_id), today) {
        Ok(absence) => (
            StatusCode::OK,
            axum::Json(AbsenceStatusView::from_absence(&absence)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn replacement_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(replacement_id): Path<String>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    match service.replacement(&ReplacementId(replacement_id)) {
        Ok(replacement) => (
            StatusCode::OK,
            axum::Json(ReplacementStatusView::from_replacement(&replacement)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn search_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(replacement_id): Path<String>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now().naive_utc();
    match service.trigger_search(&ReplacementId(replacement_id), now) {
        Ok(outcome) => {
            let (label, view) = match &outcome {
                AssignmentOutcome::Proposed(record) => {
                    ("proposed", Some(ReplacementStatusView::from_replacement(record)))
                }
                AssignmentOutcome::StillSearching(record) => (
                    "still_searching",
                    Some(ReplacementStatusView::from_replacement(record)),
                ),
                AssignmentOutcome::Exhausted(record) => (
                    "exhausted",
                    Some(ReplacementStatusView::from_replacement(record)),
                ),
                AssignmentOutcome::Unchanged(record) => (
                    "unchanged",
                    Some(ReplacementStatusView::from_replacement(record)),
                ),
                AssignmentOutcome::Discarded => ("discarded", None),
            };
            let payload = json!({ "outcome": label, "replacement": view });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

async fn accept_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(replacement_id): Path<String>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now().naive_utc();
    match service.accept(&ReplacementId(replacement_id), now) {
        Ok(replacement) => (
            StatusCode::OK,
            axum::Json(ReplacementStatusView::from_replacement(&replacement)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn reject_proposal_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(replacement_id): Path<String>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now().naive_utc();
    match service.reject_proposal(&ReplacementId(replacement_id), now) {
        Ok(replacement) => (
            StatusCode::OK,
            axum::Json(ReplacementStatusView::from_replacement(&replacement)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn confirm_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(replacement_id): Path<String>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now().naive_utc();
    match service.confirm(&ReplacementId(replacement_id), now) {
        Ok(replacement) => (
            StatusCode::OK,
            axum::Json(ReplacementStatusView::from_replacement(&replacement)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn decline_handler<A, R, B, P, N>(
    State(service): State<Arc<AbsenceWorkflowService<A, R, B, P, N>>>,
    Path(replacement_id): Path<String>,
) -> Response
where
    A: AbsenceRepository + 'static,
    R: ReplacementRepository + 'static,
    B: BookingStore + 'static,
    P: ProviderDirectory + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now().naive_utc();
    match service.decline(&ReplacementId(replacement_id), now) {
        Ok(replacement) => (
            StatusCode::OK,
            axum::Json(ReplacementStatusView::from_replacement(&replacement)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}
