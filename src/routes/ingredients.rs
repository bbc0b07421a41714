use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::ingredients::{CreateIngredientRequest, IngredientList},
    error::AppResult,
    extract::{AppJson, AppPath, AppQuery},
    middleware::auth::AuthUser,
    models::Ingredient,
    routes::params::IngredientQuery,
    services::ingredient_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_ingredients).post(create_ingredient))
        .route("/{id}", get(get_ingredient).delete(delete_ingredient))
}

#[utoipa::path(
    get,
    path = "/api/ingredients",
    params(
        ("name" = Option<String>, Query, description = "Case-insensitive name prefix")
    ),
    responses(
        (status = 200, description = "Ingredients ordered by name", body = IngredientList)
    ),
    tag = "Ingredients"
)]
pub async fn list_ingredients(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<IngredientQuery>,
) -> AppResult<Json<IngredientList>> {
    let items = ingredient_service::list_ingredients(&state, query.name.as_deref()).await?;
    Ok(Json(IngredientList { items }))
}

#[utoipa::path(
    get,
    path = "/api/ingredients/{id}",
    params(
        ("id" = Uuid, Path, description = "Ingredient ID")
    ),
    responses(
        (status = 200, description = "Ingredient", body = Ingredient),
        (status = 404, description = "Not found")
    ),
    tag = "Ingredients"
)]
pub async fn get_ingredient(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Ingredient>> {
    Ok(Json(ingredient_service::get_ingredient(&state, id).await?))
}

#[utoipa::path(
    post,
    path = "/api/ingredients",
    request_body = CreateIngredientRequest,
    responses(
        (status = 201, description = "Ingredient created", body = Ingredient),
        (status = 400, description = "Validation failed or duplicate"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Ingredients"
)]
pub async fn create_ingredient(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<CreateIngredientRequest>,
) -> AppResult<(StatusCode, Json<Ingredient>)> {
    let ingredient = ingredient_service::create_ingredient(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(ingredient)))
}

#[utoipa::path(
    delete,
    path = "/api/ingredients/{id}",
    params(
        ("id" = Uuid, Path, description = "Ingredient ID")
    ),
    responses(
        (status = 204, description = "Ingredient deleted"),
        (status = 400, description = "Ingredient is used by recipes"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Ingredients"
)]
pub async fn delete_ingredient(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    ingredient_service::delete_ingredient(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
