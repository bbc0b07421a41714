use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::ingredients::CreateIngredientRequest,
    entity::{
        RecipeIngredients,
        ingredients::{ActiveModel, Column, Entity as Ingredients, Model as IngredientModel},
        recipe_ingredients,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Ingredient,
    state::AppState,
    validation::FieldErrors,
};

pub const MAX_NAME_CHARS: usize = 128;
pub const MAX_UNIT_CHARS: usize = 64;

/// Typeahead listing: case-insensitive "starts with" on the name, unpaginated.
pub async fn list_ingredients(state: &AppState, name: Option<&str>) -> AppResult<Vec<Ingredient>> {
    let mut finder = Ingredients::find();
    if let Some(prefix) = name.map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("{}%", escape_like(prefix));
        finder = finder.filter(Expr::col(Column::Name).ilike(pattern));
    }

    let items = finder
        .order_by_asc(Column::Name)
        .order_by_asc(Column::MeasurementUnit)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Ingredient::from)
        .collect();
    Ok(items)
}

pub async fn get_ingredient(state: &AppState, id: Uuid) -> AppResult<Ingredient> {
    Ingredients::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(Ingredient::from)
        .ok_or(AppError::NotFound)
}

/// Exact `(name, unit)` lookup ignoring case, mirroring the storage-level unique index.
pub async fn find_by_name_unit<C>(
    db: &C,
    name: &str,
    measurement_unit: &str,
) -> AppResult<Option<IngredientModel>>
where
    C: ConnectionTrait,
{
    let found = Ingredients::find()
        .filter(Expr::expr(Func::lower(Expr::col(Column::Name))).eq(name.trim().to_lowercase()))
        .filter(
            Expr::expr(Func::lower(Expr::col(Column::MeasurementUnit)))
                .eq(measurement_unit.trim().to_lowercase()),
        )
        .one(db)
        .await?;
    Ok(found)
}

pub async fn create_ingredient(
    state: &AppState,
    user: &AuthUser,
    payload: CreateIngredientRequest,
) -> AppResult<Ingredient> {
    ensure_admin(user)?;

    let mut errors = FieldErrors::new();
    errors.check_text("name", &payload.name, Some(MAX_NAME_CHARS));
    errors.check_text("measurement_unit", &payload.measurement_unit, Some(MAX_UNIT_CHARS));
    errors.into_result()?;

    let name = payload.name.trim().to_string();
    let measurement_unit = payload.measurement_unit.trim().to_string();
    let duplicate = format!("Ингредиент «{name}, {measurement_unit}» уже существует.");

    if find_by_name_unit(&state.orm, &name, &measurement_unit)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(duplicate));
    }

    let ingredient = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        measurement_unit: Set(measurement_unit),
    }
    .insert(&state.orm)
    .await
    .map_err(|err| AppError::conflict_on_unique(err, duplicate))?;

    audit::record(
        state,
        user.user_id,
        "ingredient_create",
        "ingredients",
        serde_json::json!({ "ingredient_id": ingredient.id }),
    )
    .await;

    Ok(Ingredient::from(ingredient))
}

/// Deletion is refused while any recipe still uses the ingredient.
pub async fn delete_ingredient(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<()> {
    ensure_admin(user)?;

    let in_use = RecipeIngredients::find()
        .filter(recipe_ingredients::Column::IngredientId.eq(id))
        .count(&state.orm)
        .await?;
    if in_use > 0 {
        return Err(AppError::Conflict(format!(
            "Ингредиент используется в рецептах ({in_use}), удаление невозможно."
        )));
    }

    let result = Ingredients::delete_by_id(id)
        .exec(&state.orm)
        .await
        .map_err(|err| {
            AppError::conflict_on_reference(err, "Ингредиент используется в рецептах, удаление невозможно.")
        })?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        state,
        user.user_id,
        "ingredient_delete",
        "ingredients",
        serde_json::json!({ "ingredient_id": id }),
    )
    .await;

    Ok(())
}

/// Escapes LIKE wildcards so user input only ever matches literally.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn escapes_wildcards() {
        assert_eq!(escape_like("мук"), "мук");
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }
}
