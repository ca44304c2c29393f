use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use chrono::NaiveDate;
use db::models::technician::{CreateTechnician, Technician, UpdateTechnician};
use serde::Deserialize;
use services::services::scheduling::TechnicianAvailability;
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct TechnicianQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub duration: Option<i32>,
}

/// GET /api/technicians
pub async fn list_technicians(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<TechnicianQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Technician>>>, ApiError> {
    let technicians = Technician::find_all(&deployment.db().pool, query.active_only).await?;
    Ok(ResponseJson(ApiResponse::success(technicians)))
}

/// GET /api/technicians/{id}
pub async fn get_technician(
    State(deployment): State<DeploymentImpl>,
    Path(technician_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Technician>>, ApiError> {
    let technician = deployment.scheduling().technician(technician_id).await?;
    Ok(ResponseJson(ApiResponse::success(technician)))
}

/// POST /api/technicians
pub async fn create_technician(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateTechnician>,
) -> Result<ResponseJson<ApiResponse<Technician>>, ApiError> {
    let technician = deployment.scheduling().create_technician(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(technician)))
}

/// PUT /api/technicians/{id}
pub async fn update_technician(
    State(deployment): State<DeploymentImpl>,
    Path(technician_id): Path<Uuid>,
    Json(payload): Json<UpdateTechnician>,
) -> Result<ResponseJson<ApiResponse<Technician>>, ApiError> {
    let technician = deployment
        .scheduling()
        .update_technician(technician_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(technician)))
}

/// DELETE /api/technicians/{id}
/// Deactivates; technicians are never removed
pub async fn delete_technician(
    State(deployment): State<DeploymentImpl>,
    Path(technician_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    deployment
        .scheduling()
        .deactivate_technician(technician_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

/// GET /api/technicians/{id}/availability?date=&duration=
pub async fn get_availability(
    State(deployment): State<DeploymentImpl>,
    Path(technician_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<ResponseJson<ApiResponse<TechnicianAvailability>>, ApiError> {
    let duration = query
        .duration
        .unwrap_or(deployment.config().maintenance.default_duration_hours);
    let availability = deployment
        .scheduling()
        .available_slots(technician_id, query.date, duration)
        .await?;
    Ok(ResponseJson(ApiResponse::success(availability)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/technicians",
        Router::new()
            .route("/", get(list_technicians).post(create_technician))
            .route(
                "/{id}",
                get(get_technician)
                    .put(update_technician)
                    .delete(delete_technician),
            )
            .route("/{id}/availability", get(get_availability)),
    )
}
