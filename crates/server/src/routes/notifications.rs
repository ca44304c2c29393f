use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::notification::Notification;
use serde::Deserialize;
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<i64>,
}

/// GET /api/notifications?unread=
pub async fn list_notifications(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<NotificationQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Notification>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 500);
    let notifications =
        Notification::find_recent(&deployment.db().pool, query.unread, limit).await?;
    Ok(ResponseJson(ApiResponse::success(notifications)))
}

/// POST /api/notifications/{id}/read
pub async fn mark_read(
    State(deployment): State<DeploymentImpl>,
    Path(notification_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    if Notification::mark_read(&deployment.db().pool, notification_id).await? == 0 {
        return Err(ApiError::NotFound(format!(
            "notification {notification_id} not found"
        )));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

/// POST /api/notifications/read-all
/// Returns how many notifications changed
pub async fn mark_all_read(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<u64>>, ApiError> {
    let updated = Notification::mark_all_read(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/notifications",
        Router::new()
            .route("/", get(list_notifications))
            .route("/read-all", post(mark_all_read))
            .route("/{id}/read", post(mark_read)),
    )
}
