use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    extract::AppPath,
    middleware::auth::AuthUser,
    models::RecipeShort,
    services::{
        cart_service,
        shopping_list_service::{self, SHOPPING_LIST_FILENAME},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/download_shopping_cart", get(download_shopping_cart))
        .route(
            "/{id}/shopping_cart",
            post(add_to_cart).delete(remove_from_cart),
        )
}

#[utoipa::path(
    get,
    path = "/api/recipes/download_shopping_cart",
    responses(
        (status = 200, description = "Aggregated shopping list as a text attachment", body = String, content_type = "text/plain"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Shopping cart"
)]
pub async fn download_shopping_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let body = shopping_list_service::shopping_list(&state, &user).await?;
    let disposition = format!("attachment; filename=\"{SHOPPING_LIST_FILENAME}\"");

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

#[utoipa::path(
    post,
    path = "/api/recipes/{id}/shopping_cart",
    params(
        ("id" = Uuid, Path, description = "Recipe ID")
    ),
    responses(
        (status = 201, description = "Added to shopping cart", body = RecipeShort),
        (status = 400, description = "Recipe already in shopping cart"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Recipe not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Shopping cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<(StatusCode, Json<RecipeShort>)> {
    let recipe = cart_service::add_to_cart(&state, &user, id).await?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

#[utoipa::path(
    delete,
    path = "/api/recipes/{id}/shopping_cart",
    params(
        ("id" = Uuid, Path, description = "Recipe ID")
    ),
    responses(
        (status = 204, description = "Removed from shopping cart"),
        (status = 400, description = "Recipe was not in shopping cart"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Recipe not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Shopping cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    cart_service::remove_from_cart(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
