use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::invoice::{
    CreateInvoice, Invoice, InvoiceItemInput, InvoiceStatus, InvoiceWithItems,
};
use serde::{Deserialize, Serialize};
use services::services::invoicing::{CancelInvoice, InvoiceFromOrder, InvoicingError};
use ts_rs::TS;
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ReplaceInvoiceItems {
    pub items: Vec<InvoiceItemInput>,
}

/// GET /api/invoices
pub async fn list_invoices(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<InvoiceQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Invoice>>>, ApiError> {
    let invoices =
        Invoice::find_all(&deployment.db().pool, query.client_id, query.status).await?;
    Ok(ResponseJson(ApiResponse::success(invoices)))
}

/// GET /api/invoices/{id}
pub async fn get_invoice(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<InvoiceWithItems>>, ApiError> {
    let invoice = Invoice::find_with_items(&deployment.db().pool, invoice_id)
        .await?
        .ok_or(InvoicingError::InvoiceNotFound(invoice_id))?;
    Ok(ResponseJson(ApiResponse::success(invoice)))
}

/// POST /api/invoices
pub async fn create_invoice(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateInvoice>,
) -> Result<ResponseJson<ApiResponse<InvoiceWithItems>>, ApiError> {
    let invoice = deployment.invoicing().create_draft(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(invoice)))
}

/// POST /api/invoices/from-order/{order_id}
/// Header values left out fall back to the company defaults
pub async fn create_from_order(
    State(deployment): State<DeploymentImpl>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<InvoiceFromOrder>,
) -> Result<ResponseJson<ApiResponse<InvoiceWithItems>>, ApiError> {
    let invoice = deployment
        .invoicing()
        .create_from_order(order_id, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(invoice)))
}

/// PUT /api/invoices/{id}/items
pub async fn replace_items(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<ReplaceInvoiceItems>,
) -> Result<ResponseJson<ApiResponse<InvoiceWithItems>>, ApiError> {
    let invoice = deployment
        .invoicing()
        .replace_items(invoice_id, &payload.items)
        .await?;
    Ok(ResponseJson(ApiResponse::success(invoice)))
}

/// POST /api/invoices/{id}/stamp
pub async fn stamp_invoice(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Invoice>>, ApiError> {
    let invoice = deployment.invoicing().stamp(invoice_id).await?;
    Ok(ResponseJson(ApiResponse::success(invoice)))
}

/// POST /api/invoices/{id}/cancel
pub async fn cancel_invoice(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<CancelInvoice>,
) -> Result<ResponseJson<ApiResponse<Invoice>>, ApiError> {
    let invoice = deployment.invoicing().cancel(invoice_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(invoice)))
}

/// DELETE /api/invoices/{id}
/// Only drafts can be deleted
pub async fn delete_invoice(
    State(deployment): State<DeploymentImpl>,
    Path(invoice_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    deployment.invoicing().delete(invoice_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/invoices",
        Router::new()
            .route("/", get(list_invoices).post(create_invoice))
            .route("/from-order/{order_id}", post(create_from_order))
            .route("/{id}", get(get_invoice).delete(delete_invoice))
            .route("/{id}/items", put(replace_items))
            .route("/{id}/stamp", post(stamp_invoice))
            .route("/{id}/cancel", post(cancel_invoice)),
    )
}
