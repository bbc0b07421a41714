use std::collections::{HashMap, HashSet};

use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{LockType, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::recipes::{CreateRecipeRequest, RecipeIngredientInput, RecipeList, UpdateRecipeRequest},
    entity::{
        Favorites, Ingredients, RecipeIngredients, ShoppingCartItems, Subscriptions, Users,
        favorites, ingredients, recipe_ingredients,
        recipes::{ActiveModel as RecipeActive, Column, Entity as Recipes, Model as RecipeModel},
        shopping_cart_items, subscriptions, users,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Recipe, RecipeIngredient, ShortLink, User},
    response::{ApiResponse, Meta},
    routes::params::RecipeQuery,
    state::AppState,
    validation::FieldErrors,
};

pub const MAX_RECIPE_NAME_CHARS: usize = 256;

/// Validated `(ingredient_id, amount)` pair ready for insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngredientAmount {
    pub ingredient_id: Uuid,
    pub amount: i16,
}

pub async fn find_recipe<C>(db: &C, id: Uuid) -> AppResult<RecipeModel>
where
    C: ConnectionTrait,
{
    Recipes::find_by_id(id)
        .one(db)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn list_recipes(
    state: &AppState,
    viewer: Option<&AuthUser>,
    query: RecipeQuery,
) -> AppResult<ApiResponse<RecipeList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();

    if let Some(author) = query.author {
        condition = condition.add(Column::AuthorId.eq(author));
    }

    // Membership filters only make sense for a known viewer.
    if let Some(viewer) = viewer {
        if let Some(flag) = query.is_favorited {
            let favorited = Query::select()
                .column(favorites::Column::RecipeId)
                .from(Favorites)
                .and_where(favorites::Column::UserId.eq(viewer.user_id))
                .to_owned();
            condition = condition.add(if flag {
                Column::Id.in_subquery(favorited)
            } else {
                Column::Id.not_in_subquery(favorited)
            });
        }
        if let Some(flag) = query.is_in_shopping_cart {
            let in_cart = Query::select()
                .column(shopping_cart_items::Column::RecipeId)
                .from(ShoppingCartItems)
                .and_where(shopping_cart_items::Column::UserId.eq(viewer.user_id))
                .to_owned();
            condition = condition.add(if flag {
                Column::Id.in_subquery(in_cart)
            } else {
                Column::Id.not_in_subquery(in_cart)
            });
        }
    }

    let finder = Recipes::find()
        .filter(condition)
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id);

    let total = finder.clone().count(&state.orm).await? as i64;

    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let items = hydrate_recipes(&state.orm, viewer.map(|v| v.user_id), models).await?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Recipes", RecipeList { items }, Some(meta)))
}

pub async fn get_recipe(
    state: &AppState,
    viewer: Option<&AuthUser>,
    id: Uuid,
) -> AppResult<ApiResponse<Recipe>> {
    let model = find_recipe(&state.orm, id).await?;
    let recipe = hydrate_one(&state.orm, viewer.map(|v| v.user_id), model).await?;
    Ok(ApiResponse::success("Recipe", recipe, None))
}

pub async fn create_recipe(
    state: &AppState,
    user: &AuthUser,
    payload: CreateRecipeRequest,
) -> AppResult<ApiResponse<Recipe>> {
    let mut errors = FieldErrors::new();
    errors.check_text("name", &payload.name, Some(MAX_RECIPE_NAME_CHARS));
    errors.check_text("text", &payload.text, None);
    errors.check_text("image", &payload.image, None);
    let cooking_time = errors.check_small_positive("cooking_time", payload.cooking_time);
    let items = validate_ingredients(&payload.ingredients, &mut errors);

    let txn = state.orm.begin().await?;

    ensure_ingredients_exist(&txn, &items, &mut errors).await?;
    errors.into_result()?;
    let cooking_time = cooking_time
        .ok_or_else(|| anyhow::anyhow!("cooking_time missing after validation"))?;

    let recipe = RecipeActive {
        id: Set(Uuid::new_v4()),
        author_id: Set(user.user_id),
        name: Set(payload.name.trim().to_string()),
        image: Set(payload.image),
        text: Set(payload.text),
        cooking_time: Set(cooking_time),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    replace_recipe_ingredients(&txn, recipe.id, &items).await?;
    txn.commit().await?;

    audit::record(
        state,
        user.user_id,
        "recipe_create",
        "recipes",
        serde_json::json!({ "recipe_id": recipe.id, "ingredients": items.len() }),
    )
    .await;

    let recipe = hydrate_one(&state.orm, Some(user.user_id), recipe).await?;
    Ok(ApiResponse::success("Recipe created", recipe, Some(Meta::empty())))
}

/// Only the author may update. A present `ingredients` list replaces the whole
/// association set inside the same transaction as the scalar changes.
pub async fn update_recipe(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateRecipeRequest,
) -> AppResult<ApiResponse<Recipe>> {
    let txn = state.orm.begin().await?;

    let existing = Recipes::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    if existing.author_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let mut errors = FieldErrors::new();
    let mut active: RecipeActive = existing.clone().into();

    if let Some(name) = payload.name {
        errors.check_text("name", &name, Some(MAX_RECIPE_NAME_CHARS));
        active.name = Set(name.trim().to_string());
    }
    if let Some(text) = payload.text {
        errors.check_text("text", &text, None);
        active.text = Set(text);
    }
    if let Some(image) = payload.image {
        errors.check_text("image", &image, None);
        active.image = Set(image);
    }
    if let Some(cooking_time) = payload.cooking_time {
        if let Some(value) = errors.check_small_positive("cooking_time", cooking_time) {
            active.cooking_time = Set(value);
        }
    }

    let items = match payload.ingredients.as_deref() {
        Some(inputs) => {
            let items = validate_ingredients(inputs, &mut errors);
            ensure_ingredients_exist(&txn, &items, &mut errors).await?;
            Some(items)
        }
        None => None,
    };
    errors.into_result()?;

    let recipe = if active.is_changed() {
        active.update(&txn).await?
    } else {
        existing
    };

    if let Some(items) = &items {
        replace_recipe_ingredients(&txn, recipe.id, items).await?;
    }
    txn.commit().await?;

    audit::record(
        state,
        user.user_id,
        "recipe_update",
        "recipes",
        serde_json::json!({
            "recipe_id": recipe.id,
            "ingredients_replaced": items.as_ref().map(Vec::len),
        }),
    )
    .await;

    let recipe = hydrate_one(&state.orm, Some(user.user_id), recipe).await?;
    Ok(ApiResponse::success("Updated", recipe, Some(Meta::empty())))
}

pub async fn delete_recipe(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<()> {
    let recipe = find_recipe(&state.orm, id).await?;
    if recipe.author_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let result = Recipes::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        state,
        user.user_id,
        "recipe_delete",
        "recipes",
        serde_json::json!({ "recipe_id": id }),
    )
    .await;

    Ok(())
}

/// Checks emptiness, duplicates and amount bounds. Valid rows are returned even
/// when `errors` is non-empty so that later checks can still report on them.
pub fn validate_ingredients(
    inputs: &[RecipeIngredientInput],
    errors: &mut FieldErrors,
) -> Vec<IngredientAmount> {
    if inputs.is_empty() {
        errors.add("ingredients", "Нужно добавить хотя бы один ингредиент.");
        return Vec::new();
    }

    let mut seen = HashSet::with_capacity(inputs.len());
    let mut items = Vec::with_capacity(inputs.len());
    for input in inputs {
        if !seen.insert(input.id) {
            errors.add(
                "ingredients",
                format!("Ингредиент {} добавлен дважды.", input.id),
            );
            continue;
        }
        if let Some(amount) = errors.check_small_positive("ingredients", input.amount) {
            items.push(IngredientAmount {
                ingredient_id: input.id,
                amount,
            });
        }
    }
    items
}

async fn ensure_ingredients_exist<C>(
    db: &C,
    items: &[IngredientAmount],
    errors: &mut FieldErrors,
) -> AppResult<()>
where
    C: ConnectionTrait,
{
    if items.is_empty() {
        return Ok(());
    }

    let found: HashSet<Uuid> = Ingredients::find()
        .filter(ingredients::Column::Id.is_in(items.iter().map(|item| item.ingredient_id)))
        .all(db)
        .await?
        .into_iter()
        .map(|ingredient| ingredient.id)
        .collect();

    for item in items {
        if !found.contains(&item.ingredient_id) {
            errors.add(
                "ingredients",
                format!("Ингредиент {} не найден.", item.ingredient_id),
            );
        }
    }
    Ok(())
}

/// Deletes every association row of the recipe and bulk-inserts `items`.
/// Callers pass a transaction so readers never observe the empty intermediate state.
pub async fn replace_recipe_ingredients<C>(
    db: &C,
    recipe_id: Uuid,
    items: &[IngredientAmount],
) -> AppResult<()>
where
    C: ConnectionTrait,
{
    RecipeIngredients::delete_many()
        .filter(recipe_ingredients::Column::RecipeId.eq(recipe_id))
        .exec(db)
        .await?;

    if items.is_empty() {
        return Ok(());
    }

    let rows = items.iter().map(|item| recipe_ingredients::ActiveModel {
        id: Set(Uuid::new_v4()),
        recipe_id: Set(recipe_id),
        ingredient_id: Set(item.ingredient_id),
        amount: Set(item.amount),
    });
    RecipeIngredients::insert_many(rows).exec(db).await?;

    tracing::debug!(%recipe_id, count = items.len(), "recipe ingredients replaced");
    Ok(())
}

async fn hydrate_one<C>(db: &C, viewer: Option<Uuid>, model: RecipeModel) -> AppResult<Recipe>
where
    C: ConnectionTrait,
{
    hydrate_recipes(db, viewer, vec![model])
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("recipe vanished during hydration")))
}

/// Builds full representations with a fixed number of queries regardless of
/// how many recipes are passed in.
pub async fn hydrate_recipes<C>(
    db: &C,
    viewer: Option<Uuid>,
    models: Vec<RecipeModel>,
) -> AppResult<Vec<Recipe>>
where
    C: ConnectionTrait,
{
    if models.is_empty() {
        return Ok(Vec::new());
    }

    let recipe_ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
    let author_ids: HashSet<Uuid> = models.iter().map(|m| m.author_id).collect();

    let mut ingredients_by_recipe: HashMap<Uuid, Vec<RecipeIngredient>> = HashMap::new();
    let rows = RecipeIngredients::find()
        .find_also_related(Ingredients)
        .filter(recipe_ingredients::Column::RecipeId.is_in(recipe_ids.iter().copied()))
        .order_by_asc(ingredients::Column::Name)
        .all(db)
        .await?;
    for (row, ingredient) in rows {
        let Some(ingredient) = ingredient else {
            continue;
        };
        ingredients_by_recipe
            .entry(row.recipe_id)
            .or_default()
            .push(RecipeIngredient {
                id: ingredient.id,
                name: ingredient.name,
                measurement_unit: ingredient.measurement_unit,
                amount: row.amount,
            });
    }

    let authors: HashMap<Uuid, users::Model> = Users::find()
        .filter(users::Column::Id.is_in(author_ids.iter().copied()))
        .all(db)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    type Ids = HashSet<Uuid>;
    let (favorited, in_cart, subscribed): (Ids, Ids, Ids) = match viewer {
        Some(viewer) => (
            Favorites::find()
                .filter(favorites::Column::UserId.eq(viewer))
                .filter(favorites::Column::RecipeId.is_in(recipe_ids.iter().copied()))
                .all(db)
                .await?
                .into_iter()
                .map(|f| f.recipe_id)
                .collect(),
            ShoppingCartItems::find()
                .filter(shopping_cart_items::Column::UserId.eq(viewer))
                .filter(shopping_cart_items::Column::RecipeId.is_in(recipe_ids.iter().copied()))
                .all(db)
                .await?
                .into_iter()
                .map(|c| c.recipe_id)
                .collect(),
            Subscriptions::find()
                .filter(subscriptions::Column::UserId.eq(viewer))
                .filter(subscriptions::Column::AuthorId.is_in(author_ids.iter().copied()))
                .all(db)
                .await?
                .into_iter()
                .map(|s| s.author_id)
                .collect(),
        ),
        None => (HashSet::new(), HashSet::new(), HashSet::new()),
    };

    models
        .into_iter()
        .map(|model| -> AppResult<Recipe> {
            let author = authors.get(&model.author_id).cloned().ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "author {} of recipe {} missing",
                    model.author_id,
                    model.id
                ))
            })?;
            Ok(Recipe {
                id: model.id,
                author: User::from_entity(author, subscribed.contains(&model.author_id)),
                ingredients: ingredients_by_recipe.remove(&model.id).unwrap_or_default(),
                is_favorited: favorited.contains(&model.id),
                is_in_shopping_cart: in_cart.contains(&model.id),
                name: model.name,
                image: model.image,
                text: model.text,
                cooking_time: model.cooking_time,
            })
        })
        .collect()
}

/// Short codes are the recipe id in 32-digit hex form; nothing is persisted.
pub fn short_code(id: Uuid) -> String {
    id.simple().to_string()
}

pub fn parse_short_code(code: &str) -> Option<Uuid> {
    if code.len() != 32 {
        return None;
    }
    Uuid::try_parse(code).ok()
}

pub async fn short_link(state: &AppState, id: Uuid) -> AppResult<ShortLink> {
    let recipe = find_recipe(&state.orm, id).await?;
    Ok(ShortLink {
        short_link: format!("{}/s/{}", state.config.short_link_base, short_code(recipe.id)),
    })
}

pub async fn resolve_short_link(state: &AppState, code: &str) -> AppResult<Uuid> {
    let id = parse_short_code(code).ok_or(AppError::NotFound)?;
    let recipe = find_recipe(&state.orm, id).await?;
    Ok(recipe.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: Uuid, amount: i64) -> RecipeIngredientInput {
        RecipeIngredientInput { id, amount }
    }

    #[test]
    fn empty_ingredient_list_is_rejected() {
        let mut errors = FieldErrors::new();
        let items = validate_ingredients(&[], &mut errors);
        assert!(items.is_empty());
        assert_eq!(
            errors.get("ingredients"),
            Some(&["Нужно добавить хотя бы один ингредиент.".to_string()][..])
        );
    }

    #[test]
    fn duplicate_ingredient_is_reported_once_per_repeat() {
        let flour = Uuid::new_v4();
        let eggs = Uuid::new_v4();
        let mut errors = FieldErrors::new();
        let items = validate_ingredients(
            &[input(flour, 200), input(eggs, 2), input(flour, 300)],
            &mut errors,
        );
        assert_eq!(items.len(), 2);
        assert_eq!(errors.get("ingredients").map(<[String]>::len), Some(1));
    }

    #[test]
    fn amounts_outside_smallint_range_are_rejected() {
        let mut errors = FieldErrors::new();
        let items = validate_ingredients(
            &[
                input(Uuid::new_v4(), 0),
                input(Uuid::new_v4(), 32768),
                input(Uuid::new_v4(), 32767),
            ],
            &mut errors,
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, 32767);
        assert_eq!(errors.get("ingredients").map(<[String]>::len), Some(2));
    }

    #[test]
    fn short_code_round_trip() {
        let id = Uuid::new_v4();
        let code = short_code(id);
        assert_eq!(code.len(), 32);
        assert_eq!(parse_short_code(&code), Some(id));
        assert_eq!(parse_short_code(&id.to_string()), None);
        assert_eq!(parse_short_code("not-a-code"), None);
    }
}
