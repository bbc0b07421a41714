use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::{
    audit,
    entity::favorites::{ActiveModel, Column, Entity as Favorites},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::RecipeShort,
    services::recipe_service::find_recipe,
    state::AppState,
};

pub const ALREADY_FAVORITED: &str = "Рецепт уже в избранном.";
pub const NOT_FAVORITED: &str = "Рецепта не было в избранном.";

pub async fn add_favorite(
    state: &AppState,
    user: &AuthUser,
    recipe_id: Uuid,
) -> AppResult<RecipeShort> {
    let recipe = find_recipe(&state.orm, recipe_id).await?;

    ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        recipe_id: Set(recipe.id),
        added_at: NotSet,
    }
    .insert(&state.orm)
    .await
    .map_err(|err| AppError::conflict_on_unique(err, ALREADY_FAVORITED))?;

    audit::record(
        state,
        user.user_id,
        "favorite_add",
        "favorites",
        serde_json::json!({ "recipe_id": recipe.id }),
    )
    .await;

    Ok(RecipeShort::from(&recipe))
}

pub async fn remove_favorite(state: &AppState, user: &AuthUser, recipe_id: Uuid) -> AppResult<()> {
    find_recipe(&state.orm, recipe_id).await?;

    let result = Favorites::delete_many()
        .filter(Column::UserId.eq(user.user_id))
        .filter(Column::RecipeId.eq(recipe_id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::Conflict(NOT_FAVORITED.into()));
    }

    audit::record(
        state,
        user.user_id,
        "favorite_remove",
        "favorites",
        serde_json::json!({ "recipe_id": recipe_id }),
    )
    .await;

    Ok(())
}
