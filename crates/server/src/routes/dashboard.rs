use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use chrono::Utc;
use services::services::dashboard::DashboardSummary;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

/// GET /api/dashboard
pub async fn get_summary(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<DashboardSummary>>, ApiError> {
    let summary = deployment.dashboard().summary(Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(summary)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/dashboard", get(get_summary))
}
