use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use cts_protocol::routes;

use crate::handler;
use crate::state::AppState;

/// Room for the frame header and transfer metadata around an object payload.
const FRAME_OVERHEAD: usize = 4 * 1024;

/// Build the axum router with all CTS endpoints.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_object_size.saturating_add(FRAME_OVERHEAD);
    Router::new()
        .route(routes::HEALTH, get(handler::health))
        .route(
            routes::REPOSITORIES,
            get(handler::list_repositories).post(handler::create_repository),
        )
        .route(
            routes::REPOSITORY,
            get(handler::get_repository).delete(handler::delete_repository),
        )
        .route(routes::REFS, get(handler::list_refs))
        .route(routes::REF, get(handler::get_ref).post(handler::update_ref))
        .route(routes::MISSING, post(handler::missing))
        .route(routes::OBJECTS, post(handler::upload))
        .route(routes::OBJECT, get(handler::download))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}
