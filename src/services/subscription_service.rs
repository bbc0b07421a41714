use std::collections::HashMap;

use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::subscriptions::SubscriptionList,
    entity::{
        Recipes, Subscriptions, recipes, subscriptions,
        users::{Column as UserCol, Entity as Users, Model as UserModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{RecipeShort, User, UserWithRecipes},
    response::{ApiResponse, Meta},
    routes::params::SubscriptionQuery,
    state::AppState,
};

pub const SELF_SUBSCRIPTION: &str = "Нельзя подписаться на самого себя.";
pub const ALREADY_SUBSCRIBED: &str = "Вы уже подписаны на этого пользователя.";
pub const NOT_SUBSCRIBED: &str = "Вы не были подписаны на этого пользователя.";

async fn find_author(state: &AppState, author_id: Uuid) -> AppResult<UserModel> {
    Users::find_by_id(author_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn subscribe(
    state: &AppState,
    user: &AuthUser,
    author_id: Uuid,
    recipes_limit: Option<u64>,
) -> AppResult<UserWithRecipes> {
    let author = find_author(state, author_id).await?;
    if author.id == user.user_id {
        return Err(AppError::Conflict(SELF_SUBSCRIPTION.into()));
    }

    subscriptions::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        author_id: Set(author.id),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await
    .map_err(|err| AppError::conflict_on_unique(err, ALREADY_SUBSCRIBED))?;

    audit::record(
        state,
        user.user_id,
        "subscribe",
        "subscriptions",
        serde_json::json!({ "author_id": author.id }),
    )
    .await;

    let limit = recipes_limit.unwrap_or(state.config.recipes_limit);
    let mut authors = authors_with_recipes(&state.orm, vec![author], limit).await?;
    authors
        .pop()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("author vanished after subscribe")))
}

pub async fn unsubscribe(state: &AppState, user: &AuthUser, author_id: Uuid) -> AppResult<()> {
    let author = find_author(state, author_id).await?;
    if author.id == user.user_id {
        return Err(AppError::Conflict(SELF_SUBSCRIPTION.into()));
    }

    let result = Subscriptions::delete_many()
        .filter(subscriptions::Column::UserId.eq(user.user_id))
        .filter(subscriptions::Column::AuthorId.eq(author.id))
        .exec(&state.orm)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::Conflict(NOT_SUBSCRIBED.into()));
    }

    audit::record(
        state,
        user.user_id,
        "unsubscribe",
        "subscriptions",
        serde_json::json!({ "author_id": author.id }),
    )
    .await;

    Ok(())
}

pub async fn list_subscriptions(
    state: &AppState,
    user: &AuthUser,
    query: SubscriptionQuery,
) -> AppResult<ApiResponse<SubscriptionList>> {
    let (page, limit, offset) = query.pagination().normalize();

    let finder = Users::find()
        .join(JoinType::InnerJoin, subscriptions::Relation::Author.def().rev())
        .filter(subscriptions::Column::UserId.eq(user.user_id))
        .order_by_asc(UserCol::Username)
        .order_by_asc(UserCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;
    let authors = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let recipes_limit = query.recipes_limit.unwrap_or(state.config.recipes_limit);
    let items = authors_with_recipes(&state.orm, authors, recipes_limit).await?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Subscriptions",
        SubscriptionList { items },
        Some(meta),
    ))
}

/// Each author with up to `recipes_limit` newest recipes and the total
/// recipe count. Counts come from one grouped query; recipe rows are fetched
/// per author with the limit applied in SQL.
async fn authors_with_recipes<C>(
    db: &C,
    authors: Vec<UserModel>,
    recipes_limit: u64,
) -> AppResult<Vec<UserWithRecipes>>
where
    C: ConnectionTrait,
{
    if authors.is_empty() {
        return Ok(Vec::new());
    }

    let counts: HashMap<Uuid, i64> = Recipes::find()
        .select_only()
        .column(recipes::Column::AuthorId)
        .column_as(Expr::col(recipes::Column::Id).count(), "recipes_count")
        .filter(recipes::Column::AuthorId.is_in(authors.iter().map(|a| a.id)))
        .group_by(recipes::Column::AuthorId)
        .into_tuple::<(Uuid, i64)>()
        .all(db)
        .await?
        .into_iter()
        .collect();

    let mut items = Vec::with_capacity(authors.len());
    for author in authors {
        let recipes_count = counts.get(&author.id).copied().unwrap_or(0);
        let recipes = if recipes_count > 0 && recipes_limit > 0 {
            Recipes::find()
                .filter(recipes::Column::AuthorId.eq(author.id))
                .order_by_desc(recipes::Column::CreatedAt)
                .order_by_desc(recipes::Column::Id)
                .limit(recipes_limit)
                .all(db)
                .await?
                .iter()
                .map(RecipeShort::from)
                .collect()
        } else {
            Vec::new()
        };
        items.push(UserWithRecipes {
            user: User::from_entity(author, true),
            recipes,
            recipes_count,
        });
    }
    Ok(items)
}

