//! Read-only views for a single client, addressed by the client's portal token.

use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{
    client::{Client, PortalProfile},
    invoice::{Invoice, InvoiceStatus},
    maintenance::{MaintenanceVisit, VisitFilter},
};
use services::services::growatt_sync::PlantSnapshot;
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

async fn client_for_token(deployment: &DeploymentImpl, token: Uuid) -> Result<Client, ApiError> {
    Client::find_by_portal_token(&deployment.db().pool, token)
        .await?
        .ok_or_else(|| ApiError::NotFound("portal link not found".to_string()))
}

/// GET /api/portal/{token}
pub async fn get_profile(
    State(deployment): State<DeploymentImpl>,
    Path(token): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<PortalProfile>>, ApiError> {
    let client = client_for_token(&deployment, token).await?;
    Ok(ResponseJson(ApiResponse::success(PortalProfile::from(client))))
}

/// GET /api/portal/{token}/invoices
/// Drafts stay internal
pub async fn list_invoices(
    State(deployment): State<DeploymentImpl>,
    Path(token): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<Invoice>>>, ApiError> {
    let client = client_for_token(&deployment, token).await?;
    let invoices = Invoice::find_all(&deployment.db().pool, Some(client.id), None)
        .await?
        .into_iter()
        .filter(|invoice| invoice.status != InvoiceStatus::Draft)
        .collect();
    Ok(ResponseJson(ApiResponse::success(invoices)))
}

/// GET /api/portal/{token}/maintenance
pub async fn list_visits(
    State(deployment): State<DeploymentImpl>,
    Path(token): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<MaintenanceVisit>>>, ApiError> {
    let client = client_for_token(&deployment, token).await?;
    let filter = VisitFilter {
        client_id: Some(client.id),
        ..Default::default()
    };
    let visits = MaintenanceVisit::find_all(&deployment.db().pool, &filter).await?;
    Ok(ResponseJson(ApiResponse::success(visits)))
}

/// GET /api/portal/{token}/solar
/// Cached plant data; portal traffic never triggers a live Growatt call
pub async fn get_solar(
    State(deployment): State<DeploymentImpl>,
    Path(token): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<PlantSnapshot>>, ApiError> {
    let client = client_for_token(&deployment, token).await?;
    let plant_id = client
        .growatt_plant_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::NotFound("no solar plant linked".to_string()))?;
    let snapshot = deployment.growatt().snapshot(&plant_id, false).await?;
    Ok(ResponseJson(ApiResponse::success(snapshot)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/portal/{token}",
        Router::new()
            .route("/", get(get_profile))
            .route("/invoices", get(list_invoices))
            .route("/maintenance", get(list_visits))
            .route("/solar", get(get_solar)),
    )
}
