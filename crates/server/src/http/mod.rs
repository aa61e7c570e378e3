use axum::{Router, middleware::from_fn_with_state, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{AppState, middleware::require_project_auth, routes};

pub fn router(state: AppState) -> Router {
    let scoped_routes = Router::new()
        .merge(routes::users::router())
        .merge(routes::emails::router())
        .merge(routes::outbox::router(&state))
        .merge(routes::drafts::router())
        .layer(from_fn_with_state(state.clone(), require_project_auth));

    let api_routes = Router::new()
        .merge(routes::projects::router())
        .merge(scoped_routes);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
