use axum::Router;

use crate::DeploymentImpl;

pub mod clients;
pub mod dashboard;
pub mod growatt;
pub mod health;
pub mod invoices;
pub mod maintenance;
pub mod notifications;
pub mod orders;
pub mod portal;
pub mod products;
pub mod settings;
pub mod technicians;

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .merge(health::router(deployment))
        .merge(clients::router(deployment))
        .merge(products::router(deployment))
        .merge(orders::router(deployment))
        .merge(invoices::router(deployment))
        .merge(technicians::router(deployment))
        .merge(maintenance::router(deployment))
        .merge(growatt::router(deployment))
        .merge(dashboard::router(deployment))
        .merge(settings::router(deployment))
        .merge(notifications::router(deployment))
        .merge(portal::router(deployment))
}
