pub mod health_controller;
pub mod resolve_controller;

use axum::Router;

use resolve_controller::ResolveController;

pub fn app() -> Router {
    Router::new().nest("/api/v1/resolve", ResolveController::app())
}
