use axum::{Router, routing::get};

use crate::state::AppState;

pub mod auth;
pub mod cart;
pub mod doc;
pub mod favorites;
pub mod health;
pub mod ingredients;
pub mod params;
pub mod recipes;
pub mod short_links;
pub mod users;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/users", users::router())
        .nest("/ingredients", ingredients::router())
        .nest("/recipes", recipes::router())
}

/// Everything the server mounts, still waiting for its state.
pub fn create_app_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/db", get(health::database_check))
        .nest("/api", create_api_router())
        .merge(short_links::router())
        .merge(doc::scalar_docs())
}
