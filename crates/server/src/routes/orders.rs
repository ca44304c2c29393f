use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::order::{
    CreateOrder, Order, OrderItemInput, OrderStatus, OrderWithItems, UpdateOrder,
};
use serde::{Deserialize, Serialize};
use services::services::inventory::InventoryError;
use ts_rs::TS;
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ReplaceOrderItems {
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ChangeOrderStatus {
    pub status: OrderStatus,
}

/// GET /api/orders
pub async fn list_orders(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<OrderQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Order>>>, ApiError> {
    let orders = Order::find_all(&deployment.db().pool, query.client_id, query.status).await?;
    Ok(ResponseJson(ApiResponse::success(orders)))
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(deployment): State<DeploymentImpl>,
    Path(order_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<OrderWithItems>>, ApiError> {
    let order = Order::find_with_items(&deployment.db().pool, order_id)
        .await?
        .ok_or(InventoryError::OrderNotFound(order_id))?;
    Ok(ResponseJson(ApiResponse::success(order)))
}

/// POST /api/orders
/// New orders start as quotes
pub async fn create_order(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateOrder>,
) -> Result<ResponseJson<ApiResponse<OrderWithItems>>, ApiError> {
    let order = deployment.orders().create_order(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(order)))
}

/// PUT /api/orders/{id}
pub async fn update_order(
    State(deployment): State<DeploymentImpl>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateOrder>,
) -> Result<ResponseJson<ApiResponse<Order>>, ApiError> {
    let order = deployment.orders().update_details(order_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(order)))
}

/// PUT /api/orders/{id}/items
pub async fn replace_items(
    State(deployment): State<DeploymentImpl>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<ReplaceOrderItems>,
) -> Result<ResponseJson<ApiResponse<OrderWithItems>>, ApiError> {
    let order = deployment
        .orders()
        .replace_items(order_id, &payload.items)
        .await?;
    Ok(ResponseJson(ApiResponse::success(order)))
}

/// POST /api/orders/{id}/status
/// Reserves or releases stock as the order moves through its lifecycle
pub async fn change_status(
    State(deployment): State<DeploymentImpl>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<ChangeOrderStatus>,
) -> Result<ResponseJson<ApiResponse<Order>>, ApiError> {
    let order = deployment
        .orders()
        .set_status(order_id, payload.status)
        .await?;
    Ok(ResponseJson(ApiResponse::success(order)))
}

/// DELETE /api/orders/{id}
pub async fn delete_order(
    State(deployment): State<DeploymentImpl>,
    Path(order_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    deployment.orders().delete_order(order_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/orders",
        Router::new()
            .route("/", get(list_orders).post(create_order))
            .route("/{id}", get(get_order).put(update_order).delete(delete_order))
            .route("/{id}/items", put(replace_items))
            .route("/{id}/status", post(change_status)),
    )
}
