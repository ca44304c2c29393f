use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::{Local, NaiveDate};
use db::models::{
    maintenance::{
        CreateMaintenanceSchedule, CreateMaintenanceVisit, MaintenanceSchedule,
        MaintenanceVisit, UpdateMaintenanceSchedule, VisitFilter,
    },
    technician::Technician,
};
use serde::Deserialize;
use services::services::{
    maintenance::{GeneratedVisit, MaintenanceError, RescheduleVisit, UpdateVisitStatus},
    scheduling::SlotSuggestion,
};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableTechniciansQuery {
    pub date: NaiveDate,
    pub start_hour: i32,
    pub duration: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct NextSlotQuery {
    pub from: Option<NaiveDate>,
    pub duration: Option<i32>,
    pub technician_id: Option<Uuid>,
}

/// GET /api/maintenance/schedules
pub async fn list_schedules(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<ScheduleQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<MaintenanceSchedule>>>, ApiError> {
    let schedules = MaintenanceSchedule::find_all(&deployment.db().pool, query.client_id).await?;
    Ok(ResponseJson(ApiResponse::success(schedules)))
}

/// GET /api/maintenance/schedules/{id}
pub async fn get_schedule(
    State(deployment): State<DeploymentImpl>,
    Path(schedule_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<MaintenanceSchedule>>, ApiError> {
    let schedule = MaintenanceSchedule::find_by_id(&deployment.db().pool, schedule_id)
        .await?
        .ok_or(MaintenanceError::ScheduleNotFound(schedule_id))?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

/// POST /api/maintenance/schedules
pub async fn create_schedule(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateMaintenanceSchedule>,
) -> Result<ResponseJson<ApiResponse<MaintenanceSchedule>>, ApiError> {
    let schedule = deployment.maintenance().create_schedule(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

/// PUT /api/maintenance/schedules/{id}
pub async fn update_schedule(
    State(deployment): State<DeploymentImpl>,
    Path(schedule_id): Path<Uuid>,
    Json(payload): Json<UpdateMaintenanceSchedule>,
) -> Result<ResponseJson<ApiResponse<MaintenanceSchedule>>, ApiError> {
    let schedule = deployment
        .maintenance()
        .update_schedule(schedule_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

/// DELETE /api/maintenance/schedules/{id}
/// Visits already generated from the schedule are kept
pub async fn delete_schedule(
    State(deployment): State<DeploymentImpl>,
    Path(schedule_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let rows_affected = MaintenanceSchedule::delete(&deployment.db().pool, schedule_id).await?;
    if rows_affected == 0 {
        return Err(MaintenanceError::ScheduleNotFound(schedule_id).into());
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

/// POST /api/maintenance/schedules/{id}/generate
/// Generate the next visit now instead of waiting for the planner
pub async fn generate_visit(
    State(deployment): State<DeploymentImpl>,
    Path(schedule_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<GeneratedVisit>>, ApiError> {
    let generated = deployment
        .maintenance()
        .generate_for_schedule(schedule_id, Local::now().date_naive())
        .await?;
    Ok(ResponseJson(ApiResponse::success(generated)))
}

/// GET /api/maintenance/visits
pub async fn list_visits(
    State(deployment): State<DeploymentImpl>,
    Query(filter): Query<VisitFilter>,
) -> Result<ResponseJson<ApiResponse<Vec<MaintenanceVisit>>>, ApiError> {
    let visits = MaintenanceVisit::find_all(&deployment.db().pool, &filter).await?;
    Ok(ResponseJson(ApiResponse::success(visits)))
}

/// GET /api/maintenance/visits/{id}
pub async fn get_visit(
    State(deployment): State<DeploymentImpl>,
    Path(visit_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<MaintenanceVisit>>, ApiError> {
    let visit = MaintenanceVisit::find_by_id(&deployment.db().pool, visit_id)
        .await?
        .ok_or(MaintenanceError::VisitNotFound(visit_id))?;
    Ok(ResponseJson(ApiResponse::success(visit)))
}

/// POST /api/maintenance/visits
pub async fn create_visit(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateMaintenanceVisit>,
) -> Result<ResponseJson<ApiResponse<MaintenanceVisit>>, ApiError> {
    let visit = deployment.maintenance().create_visit(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(visit)))
}

/// POST /api/maintenance/visits/{id}/reschedule
pub async fn reschedule_visit(
    State(deployment): State<DeploymentImpl>,
    Path(visit_id): Path<Uuid>,
    Json(payload): Json<RescheduleVisit>,
) -> Result<ResponseJson<ApiResponse<MaintenanceVisit>>, ApiError> {
    let visit = deployment
        .maintenance()
        .reschedule_visit(visit_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(visit)))
}

/// POST /api/maintenance/visits/{id}/status
pub async fn update_visit_status(
    State(deployment): State<DeploymentImpl>,
    Path(visit_id): Path<Uuid>,
    Json(payload): Json<UpdateVisitStatus>,
) -> Result<ResponseJson<ApiResponse<MaintenanceVisit>>, ApiError> {
    let visit = deployment
        .maintenance()
        .update_visit_status(visit_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(visit)))
}

/// GET /api/maintenance/available-technicians?date=&start_hour=&duration=
pub async fn available_technicians(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<AvailableTechniciansQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Technician>>>, ApiError> {
    let duration = query
        .duration
        .unwrap_or(deployment.config().maintenance.default_duration_hours);
    let technicians = deployment
        .scheduling()
        .available_technicians(query.date, query.start_hour, duration)
        .await?;
    Ok(ResponseJson(ApiResponse::success(technicians)))
}

/// GET /api/maintenance/next-slot?from=&duration=&technician_id=
/// `null` when nothing is free within the search horizon
pub async fn next_slot(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<NextSlotQuery>,
) -> Result<ResponseJson<ApiResponse<Option<SlotSuggestion>>>, ApiError> {
    let from = query.from.unwrap_or_else(|| Local::now().date_naive());
    let duration = query
        .duration
        .unwrap_or(deployment.config().maintenance.default_duration_hours);
    let suggestion = deployment
        .scheduling()
        .next_available(query.technician_id, from, duration)
        .await?;
    Ok(ResponseJson(ApiResponse::success(suggestion)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let schedules = Router::new()
        .route("/", get(list_schedules).post(create_schedule))
        .route(
            "/{id}",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/{id}/generate", post(generate_visit));

    let visits = Router::new()
        .route("/", get(list_visits).post(create_visit))
        .route("/{id}", get(get_visit))
        .route("/{id}/reschedule", post(reschedule_visit))
        .route("/{id}/status", post(update_visit_status));

    Router::new().nest(
        "/maintenance",
        Router::new()
            .nest("/schedules", schedules)
            .nest("/visits", visits)
            .route("/available-technicians", get(available_technicians))
            .route("/next-slot", get(next_slot)),
    )
}
