use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use services::services::{
    clients::ClientError, growatt::GrowattError, inventory::InventoryError,
    invoicing::InvoicingError, maintenance::MaintenanceError, scheduling::SchedulingError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Invoicing(#[from] InvoicingError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),
    #[error(transparent)]
    Growatt(#[from] GrowattError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
}

fn database_status(e: &sqlx::Error) -> StatusCode {
    match e {
        sqlx::Error::RowNotFound => StatusCode::NOT_FOUND,
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() =>
        {
            StatusCode::CONFLICT
        }
        sqlx::Error::Database(db) if db.is_check_violation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn scheduling_status(e: &SchedulingError) -> StatusCode {
    match e {
        SchedulingError::Database(e) => database_status(e),
        SchedulingError::TechnicianNotFound(_) => StatusCode::NOT_FOUND,
        SchedulingError::TechnicianInactive(_)
        | SchedulingError::InvalidWorkingHours { .. }
        | SchedulingError::Validation(_)
        | SchedulingError::InvalidDuration(_)
        | SchedulingError::NonWorkingDay(_)
        | SchedulingError::OutsideWorkingHours { .. } => StatusCode::BAD_REQUEST,
        SchedulingError::Conflict { .. } => StatusCode::CONFLICT,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Database(e) => database_status(e),
            ApiError::Client(e) => match e {
                ClientError::Database(e) => database_status(e),
                ClientError::NotFound(_) => StatusCode::NOT_FOUND,
                ClientError::Validation(_) => StatusCode::BAD_REQUEST,
                ClientError::InUse(_) => StatusCode::CONFLICT,
            },
            ApiError::Inventory(e) => match e {
                InventoryError::Database(e) => database_status(e),
                InventoryError::OrderNotFound(_)
                | InventoryError::ProductNotFound(_)
                | InventoryError::ClientNotFound(_) => StatusCode::NOT_FOUND,
                InventoryError::InvalidTransition { .. }
                | InventoryError::NotEditable(_)
                | InventoryError::NotDeletable(_)
                | InventoryError::InsufficientStock { .. } => StatusCode::CONFLICT,
                InventoryError::NotStockTracked(_) | InventoryError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
            },
            ApiError::Invoicing(e) => match e {
                InvoicingError::Database(e) => database_status(e),
                InvoicingError::InvoiceNotFound(_)
                | InvoicingError::ClientNotFound(_)
                | InvoicingError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                InvoicingError::InvalidStatus { .. } => StatusCode::CONFLICT,
                InvoicingError::MissingRfc
                | InvoicingError::NoItems
                | InvoicingError::Validation(_) => StatusCode::BAD_REQUEST,
                InvoicingError::Pac(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Scheduling(e) => scheduling_status(e),
            ApiError::Maintenance(e) => match e {
                MaintenanceError::Database(e) => database_status(e),
                MaintenanceError::Scheduling(e) => scheduling_status(e),
                MaintenanceError::ScheduleNotFound(_)
                | MaintenanceError::VisitNotFound(_)
                | MaintenanceError::ClientNotFound(_) => StatusCode::NOT_FOUND,
                MaintenanceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            },
            ApiError::Growatt(e) => match e {
                GrowattError::PlantNotFound(_) => StatusCode::NOT_FOUND,
                GrowattError::Disabled => StatusCode::BAD_REQUEST,
                GrowattError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_GATEWAY,
            },
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ApiResponse::<()>::error(&message);
        (status, ResponseJson(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use db::models::order::OrderStatus;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn service_errors_map_to_status_codes() {
        let conflict: ApiError = SchedulingError::Conflict {
            visit_id: Uuid::new_v4(),
        }
        .into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let transition: ApiError = InventoryError::InvalidTransition {
            from: OrderStatus::Completed,
            to: OrderStatus::Quote,
        }
        .into();
        assert_eq!(transition.status(), StatusCode::CONFLICT);

        let nested: ApiError =
            MaintenanceError::Scheduling(SchedulingError::InvalidDuration(0)).into();
        assert_eq!(nested.status(), StatusCode::BAD_REQUEST);

        let upstream: ApiError = GrowattError::Timeout.into();
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);

        let missing: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
