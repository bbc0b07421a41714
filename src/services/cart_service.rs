use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::{
    audit,
    entity::shopping_cart_items::{ActiveModel, Column, Entity as ShoppingCartItems},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::RecipeShort,
    services::recipe_service::find_recipe,
    state::AppState,
};

pub const ALREADY_IN_CART: &str = "Рецепт уже в списке покупок.";
pub const NOT_IN_CART: &str = "Рецепта не было в списке покупок.";

/// Adding an existing pair is a conflict, not a no-op. The unique constraint
/// decides races: of two concurrent adds exactly one succeeds.
pub async fn add_to_cart(
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
    .map_err(|err| AppError::conflict_on_unique(err, ALREADY_IN_CART))?;

    audit::record(
        state,
        user.user_id,
        "cart_add",
        "shopping_cart_items",
        serde_json::json!({ "recipe_id": recipe.id }),
    )
    .await;

    Ok(RecipeShort::from(&recipe))
}

pub async fn remove_from_cart(state: &AppState, user: &AuthUser, recipe_id: Uuid) -> AppResult<()> {
    find_recipe(&state.orm, recipe_id).await?;

    let result = ShoppingCartItems::delete_many()
        .filter(Column::UserId.eq(user.user_id))
        .filter(Column::RecipeId.eq(recipe_id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::Conflict(NOT_IN_CART.into()));
    }

    audit::record(
        state,
        user.user_id,
        "cart_remove",
        "shopping_cart_items",
        serde_json::json!({ "recipe_id": recipe_id }),
    )
    .await;

    Ok(())
}
