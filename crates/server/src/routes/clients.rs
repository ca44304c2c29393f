use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::client::{Client, CreateClient, UpdateClient};
use serde::Deserialize;
use services::services::clients::ClientError;
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    pub search: Option<String>,
}

/// GET /api/clients
pub async fn list_clients(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<ClientQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Client>>>, ApiError> {
    let clients = Client::find_all(&deployment.db().pool, query.search.as_deref()).await?;
    Ok(ResponseJson(ApiResponse::success(clients)))
}

/// GET /api/clients/{id}
pub async fn get_client(
    State(deployment): State<DeploymentImpl>,
    Path(client_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Client>>, ApiError> {
    let client = Client::find_by_id(&deployment.db().pool, client_id)
        .await?
        .ok_or(ClientError::NotFound(client_id))?;
    Ok(ResponseJson(ApiResponse::success(client)))
}

/// POST /api/clients
pub async fn create_client(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateClient>,
) -> Result<ResponseJson<ApiResponse<Client>>, ApiError> {
    let client = deployment.clients().create(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(client)))
}

/// PUT /api/clients/{id}
pub async fn update_client(
    State(deployment): State<DeploymentImpl>,
    Path(client_id): Path<Uuid>,
    Json(payload): Json<UpdateClient>,
) -> Result<ResponseJson<ApiResponse<Client>>, ApiError> {
    let client = deployment.clients().update(client_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(client)))
}

/// DELETE /api/clients/{id}
pub async fn delete_client(
    State(deployment): State<DeploymentImpl>,
    Path(client_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    deployment.clients().delete(client_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

/// POST /api/clients/{id}/portal-token
/// Issue a new portal link token; the previous link stops working
pub async fn rotate_portal_token(
    State(deployment): State<DeploymentImpl>,
    Path(client_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Uuid>>, ApiError> {
    let token = deployment.clients().rotate_portal_token(client_id).await?;
    Ok(ResponseJson(ApiResponse::success(token)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/clients",
        Router::new()
            .route("/", get(list_clients).post(create_client))
            .route(
                "/{id}",
                get(get_client).put(update_client).delete(delete_client),
            )
            .route("/{id}/portal-token", post(rotate_portal_token)),
    )
}
