pub mod deployment;
pub mod error;
pub mod routes;

use axum::Router;
pub use deployment::DeploymentImpl;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// The full HTTP application, every route nested under `/api`
pub fn app(deployment: DeploymentImpl) -> Router {
    Router::new()
        .nest("/api", routes::router(&deployment))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(deployment)
}
