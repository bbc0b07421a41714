use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::recipes::{CreateRecipeRequest, RecipeList, UpdateRecipeRequest},
    error::AppResult,
    extract::{AppJson, AppPath, AppQuery},
    middleware::auth::AuthUser,
    models::{Recipe, ShortLink},
    response::ApiResponse,
    routes::{cart, favorites, params::RecipeQuery},
    services::recipe_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_recipes).post(create_recipe))
        .route(
            "/{id}",
            get(get_recipe).patch(update_recipe).delete(delete_recipe),
        )
        .route("/{id}/get-link", get(get_link))
        .merge(cart::router())
        .merge(favorites::router())
}

#[utoipa::path(
    get,
    path = "/api/recipes",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("limit" = Option<i64>, Query, description = "Items per page, default 6"),
        ("author" = Option<Uuid>, Query, description = "Only recipes by this author"),
        ("is_favorited" = Option<String>, Query, description = "1 or 0; ignored for anonymous callers"),
        ("is_in_shopping_cart" = Option<String>, Query, description = "1 or 0; ignored for anonymous callers")
    ),
    responses(
        (status = 200, description = "Recipes, newest first", body = ApiResponse<RecipeList>)
    ),
    tag = "Recipes"
)]
pub async fn list_recipes(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    AppQuery(query): AppQuery<RecipeQuery>,
) -> AppResult<Json<ApiResponse<RecipeList>>> {
    let resp = recipe_service::list_recipes(&state, viewer.as_ref(), query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/recipes/{id}",
    params(
        ("id" = Uuid, Path, description = "Recipe ID")
    ),
    responses(
        (status = 200, description = "Recipe", body = ApiResponse<Recipe>),
        (status = 404, description = "Not found")
    ),
    tag = "Recipes"
)]
pub async fn get_recipe(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<ApiResponse<Recipe>>> {
    let resp = recipe_service::get_recipe(&state, viewer.as_ref(), id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/recipes",
    request_body = CreateRecipeRequest,
    responses(
        (status = 201, description = "Recipe created", body = ApiResponse<Recipe>),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Recipes"
)]
pub async fn create_recipe(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<CreateRecipeRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Recipe>>)> {
    let resp = recipe_service::create_recipe(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    patch,
    path = "/api/recipes/{id}",
    params(
        ("id" = Uuid, Path, description = "Recipe ID")
    ),
    request_body = UpdateRecipeRequest,
    responses(
        (status = 200, description = "Recipe updated", body = ApiResponse<Recipe>),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Recipes"
)]
pub async fn update_recipe(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateRecipeRequest>,
) -> AppResult<Json<ApiResponse<Recipe>>> {
    let resp = recipe_service::update_recipe(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/recipes/{id}",
    params(
        ("id" = Uuid, Path, description = "Recipe ID")
    ),
    responses(
        (status = 204, description = "Recipe deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Recipes"
)]
pub async fn delete_recipe(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    recipe_service::delete_recipe(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/recipes/{id}/get-link",
    params(
        ("id" = Uuid, Path, description = "Recipe ID")
    ),
    responses(
        (status = 200, description = "Short link to the recipe", body = ShortLink),
        (status = 404, description = "Not found")
    ),
    tag = "Recipes"
)]
pub async fn get_link(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<ShortLink>> {
    Ok(Json(recipe_service::short_link(&state, id).await?))
}
