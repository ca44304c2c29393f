use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::growatt::GrowattSyncRun;
use serde::Deserialize;
use services::services::{
    growatt::GrowattError,
    growatt_sync::{PlantSnapshot, SolarOverview},
};
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct PlantQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// GET /api/growatt/plants
/// Cached data only, never calls Growatt
pub async fn list_plants(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<SolarOverview>>, ApiError> {
    let overview = deployment.growatt().overview().await?;
    Ok(ResponseJson(ApiResponse::success(overview)))
}

/// GET /api/growatt/plants/{plant_id}?refresh=
pub async fn get_plant(
    State(deployment): State<DeploymentImpl>,
    Path(plant_id): Path<String>,
    Query(query): Query<PlantQuery>,
) -> Result<ResponseJson<ApiResponse<PlantSnapshot>>, ApiError> {
    let snapshot = deployment
        .growatt()
        .snapshot(&plant_id, query.refresh)
        .await?;
    Ok(ResponseJson(ApiResponse::success(snapshot)))
}

/// POST /api/growatt/sync
/// Run a full sync now; the outcome is recorded on the returned run
pub async fn sync_now(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<GrowattSyncRun>>, ApiError> {
    if !deployment.growatt().enabled() {
        return Err(GrowattError::Disabled.into());
    }
    let run = deployment.growatt().sync_once().await?;
    Ok(ResponseJson(ApiResponse::success(run)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/growatt",
        Router::new()
            .route("/plants", get(list_plants))
            .route("/plants/{plant_id}", get(get_plant))
            .route("/sync", post(sync_now)),
    )
}
