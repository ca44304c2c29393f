use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::product::{
    CreateProduct, Product, ProductCategory, StockAdjustment, StockMovement, UpdateProduct,
};
use serde::Deserialize;
use services::services::inventory::{InventoryError, validate_product, validate_product_update};
use tracing::info;
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

const MOVEMENT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub category: Option<ProductCategory>,
    #[serde(default)]
    pub low_stock: bool,
}

/// GET /api/products
pub async fn list_products(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<ProductQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Product>>>, ApiError> {
    let products =
        Product::find_all(&deployment.db().pool, query.category, query.low_stock).await?;
    Ok(ResponseJson(ApiResponse::success(products)))
}

/// GET /api/products/{id}
pub async fn get_product(
    State(deployment): State<DeploymentImpl>,
    Path(product_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Product>>, ApiError> {
    let product = Product::find_by_id(&deployment.db().pool, product_id)
        .await?
        .ok_or(InventoryError::ProductNotFound(product_id))?;
    Ok(ResponseJson(ApiResponse::success(product)))
}

/// POST /api/products
pub async fn create_product(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateProduct>,
) -> Result<ResponseJson<ApiResponse<Product>>, ApiError> {
    validate_product(&payload)?;
    let product = Product::create(&deployment.db().pool, &payload, Uuid::new_v4()).await?;
    info!(product_id = %product.id, sku = %product.sku, "Product created");
    Ok(ResponseJson(ApiResponse::success(product)))
}

/// PUT /api/products/{id}
/// Stock is not editable here, use the stock endpoint
pub async fn update_product(
    State(deployment): State<DeploymentImpl>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateProduct>,
) -> Result<ResponseJson<ApiResponse<Product>>, ApiError> {
    validate_product_update(&payload)?;
    let product = Product::update(&deployment.db().pool, product_id, &payload)
        .await?
        .ok_or(InventoryError::ProductNotFound(product_id))?;
    Ok(ResponseJson(ApiResponse::success(product)))
}

/// DELETE /api/products/{id}
pub async fn delete_product(
    State(deployment): State<DeploymentImpl>,
    Path(product_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let rows_affected = Product::delete(&deployment.db().pool, product_id).await?;
    if rows_affected == 0 {
        return Err(InventoryError::ProductNotFound(product_id).into());
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

/// POST /api/products/{id}/stock
pub async fn adjust_stock(
    State(deployment): State<DeploymentImpl>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<StockAdjustment>,
) -> Result<ResponseJson<ApiResponse<Product>>, ApiError> {
    let product = deployment.orders().adjust_stock(product_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(product)))
}

/// GET /api/products/{id}/movements
/// Most recent first
pub async fn list_movements(
    State(deployment): State<DeploymentImpl>,
    Path(product_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<StockMovement>>>, ApiError> {
    let movements =
        StockMovement::find_by_product_id(&deployment.db().pool, product_id, MOVEMENT_LIMIT)
            .await?;
    Ok(ResponseJson(ApiResponse::success(movements)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/products",
        Router::new()
            .route("/", get(list_products).post(create_product))
            .route(
                "/{id}",
                get(get_product).put(update_product).delete(delete_product),
            )
            .route("/{id}/stock", post(adjust_stock))
            .route("/{id}/movements", get(list_movements)),
    )
}
