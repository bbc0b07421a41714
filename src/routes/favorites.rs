use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use uuid::Uuid;

use crate::{
    error::AppResult, extract::AppPath, middleware::auth::AuthUser, models::RecipeShort,
    services::favorite_service, state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/{id}/favorite", post(add_favorite).delete(remove_favorite))
}

#[utoipa::path(
    post,
    path = "/api/recipes/{id}/favorite",
    params(
        ("id" = Uuid, Path, description = "Recipe ID")
    ),
    responses(
        (status = 201, description = "Added to favorites", body = RecipeShort),
        (status = 400, description = "Recipe already in favorites"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Recipe not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Favorites"
)]
pub async fn add_favorite(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<(StatusCode, Json<RecipeShort>)> {
    let recipe = favorite_service::add_favorite(&state, &user, id).await?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

#[utoipa::path(
    delete,
    path = "/api/recipes/{id}/favorite",
    params(
        ("id" = Uuid, Path, description = "Recipe ID")
    ),
    responses(
        (status = 204, description = "Removed from favorites"),
        (status = 400, description = "Recipe was not in favorites"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Recipe not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Favorites"
)]
pub async fn remove_favorite(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    favorite_service::remove_favorite(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
