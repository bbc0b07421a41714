use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::{auth::SetPasswordRequest, subscriptions::SubscriptionList, users::UserList},
    error::AppResult,
    extract::{AppJson, AppPath, AppQuery},
    middleware::auth::AuthUser,
    models::{User, UserWithRecipes},
    response::ApiResponse,
    routes::params::{Pagination, RecipesLimitQuery, SubscriptionQuery},
    services::{auth_service, subscription_service, user_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/me", get(me))
        .route("/set_password", post(set_password))
        .route("/subscriptions", get(list_subscriptions))
        .route("/{id}", get(get_user))
        .route("/{id}/subscribe", post(subscribe).delete(unsubscribe))
}

#[utoipa::path(
    get,
    path = "/api/users",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("limit" = Option<i64>, Query, description = "Items per page, default 6")
    ),
    responses(
        (status = 200, description = "Users ordered by id", body = ApiResponse<UserList>),
        (status = 400, description = "Malformed query parameters")
    ),
    tag = "Users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    AppQuery(pagination): AppQuery<Pagination>,
) -> AppResult<Json<ApiResponse<UserList>>> {
    let resp = user_service::list_users(&state, viewer.as_ref(), pagination).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/users/set_password",
    request_body = SetPasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Wrong current password or new password too short"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn set_password(
    State(state): State<AppState>,
    user: AuthUser,
    AppJson(payload): AppJson<SetPasswordRequest>,
) -> AppResult<StatusCode> {
    auth_service::set_password(&state, &user, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/users/me",
    responses(
        (status = 200, description = "Current user", body = ApiResponse<User>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<User>>> {
    Ok(Json(user_service::me(&state, &user).await?))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(
        ("id" = Uuid, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User profile", body = ApiResponse<User>),
        (status = 404, description = "Not found")
    ),
    tag = "Users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    Ok(Json(user_service::get_user(&state, viewer.as_ref(), id).await?))
}

#[utoipa::path(
    get,
    path = "/api/users/subscriptions",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("limit" = Option<i64>, Query, description = "Items per page, default 6"),
        ("recipes_limit" = Option<u64>, Query, description = "Recipes shown per author")
    ),
    responses(
        (status = 200, description = "Followed authors with their latest recipes", body = ApiResponse<SubscriptionList>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    user: AuthUser,
    AppQuery(query): AppQuery<SubscriptionQuery>,
) -> AppResult<Json<ApiResponse<SubscriptionList>>> {
    let resp = subscription_service::list_subscriptions(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/subscribe",
    params(
        ("id" = Uuid, Path, description = "Author ID"),
        ("recipes_limit" = Option<u64>, Query, description = "Recipes shown for the author")
    ),
    responses(
        (status = 201, description = "Subscribed", body = UserWithRecipes),
        (status = 400, description = "Already subscribed or self-subscription"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Author not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppQuery(query): AppQuery<RecipesLimitQuery>,
) -> AppResult<(StatusCode, Json<UserWithRecipes>)> {
    let author = subscription_service::subscribe(&state, &user, id, query.recipes_limit).await?;
    Ok((StatusCode::CREATED, Json(author)))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}/subscribe",
    params(
        ("id" = Uuid, Path, description = "Author ID")
    ),
    responses(
        (status = 204, description = "Unsubscribed"),
        (status = 400, description = "Was not subscribed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Author not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    subscription_service::unsubscribe(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
