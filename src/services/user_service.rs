use std::collections::HashSet;

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use uuid::Uuid;

use crate::{
    dto::users::UserList,
    entity::{Subscriptions, Users, subscriptions, users},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::User,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

pub async fn me(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let model = Users::find_by_id(user.user_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(ApiResponse::success("Me", User::from_entity(model, false), None))
}

pub async fn get_user(
    state: &AppState,
    viewer: Option<&AuthUser>,
    id: Uuid,
) -> AppResult<ApiResponse<User>> {
    let model = Users::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let is_subscribed = match viewer {
        Some(viewer) => is_subscribed(state, viewer.user_id, id).await?,
        None => false,
    };

    Ok(ApiResponse::success(
        "User",
        User::from_entity(model, is_subscribed),
        None,
    ))
}

pub async fn is_subscribed(state: &AppState, user_id: Uuid, author_id: Uuid) -> AppResult<bool> {
    let count = Subscriptions::find()
        .filter(subscriptions::Column::UserId.eq(user_id))
        .filter(subscriptions::Column::AuthorId.eq(author_id))
        .count(&state.orm)
        .await?;
    Ok(count > 0)
}

pub async fn list_users(
    state: &AppState,
    viewer: Option<&AuthUser>,
    pagination: Pagination,
) -> AppResult<ApiResponse<UserList>> {
    let (page, limit, offset) = pagination.normalize();

    let total = Users::find().count(&state.orm).await? as i64;
    let models = Users::find()
        .order_by_asc(users::Column::Id)
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let followed: HashSet<Uuid> = match viewer {
        Some(viewer) if !models.is_empty() => Subscriptions::find()
            .select_only()
            .column(subscriptions::Column::AuthorId)
            .filter(subscriptions::Column::UserId.eq(viewer.user_id))
            .filter(subscriptions::Column::AuthorId.is_in(models.iter().map(|m| m.id)))
            .into_tuple::<Uuid>()
            .all(&state.orm)
            .await?
            .into_iter()
            .collect(),
        _ => HashSet::new(),
    };

    let items = models
        .into_iter()
        .map(|model| {
            let is_subscribed = followed.contains(&model.id);
            User::from_entity(model, is_subscribed)
        })
        .collect();

    Ok(ApiResponse::success(
        "Users",
        UserList { items },
        Some(Meta::new(page, limit, total)),
    ))
}
