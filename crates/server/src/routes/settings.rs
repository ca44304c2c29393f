use axum::{
    Json, Router, extract::State, response::Json as ResponseJson, routing::get,
};
use db::models::company_settings::{CompanySettings, UpdateCompanySettings};
use services::services::clients::normalize_rfc;
use tracing::info;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

/// GET /api/settings/company
pub async fn get_company_settings(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<CompanySettings>>, ApiError> {
    let settings = CompanySettings::get(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(settings)))
}

/// PUT /api/settings/company
pub async fn update_company_settings(
    State(deployment): State<DeploymentImpl>,
    Json(mut payload): Json<UpdateCompanySettings>,
) -> Result<ResponseJson<ApiResponse<CompanySettings>>, ApiError> {
    if let Some(raw) = payload.rfc.as_deref() {
        payload.rfc = normalize_rfc(raw)?;
    }
    if payload
        .default_tax_rate
        .is_some_and(|rate| !(0.0..=1.0).contains(&rate))
    {
        return Err(ApiError::BadRequest(
            "default_tax_rate must be between 0 and 1".to_string(),
        ));
    }
    let settings = CompanySettings::update(&deployment.db().pool, &payload).await?;
    info!(business_name = %settings.business_name, "Company settings updated");
    Ok(ResponseJson(ApiResponse::success(settings)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route(
        "/settings/company",
        get(get_company_settings).put(update_company_settings),
    )
}
