//! Shopping list aggregation.
//!
//! Sums ingredient amounts over every recipe in a user's cart in one
//! `GROUP BY` query and renders the result as a plain-text report.

use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, JoinType, QueryFilter, QueryOrder,
    QuerySelect, RelationDef, RelationTrait,
};
use uuid::Uuid;

use crate::{
    entity::{
        RecipeIngredients, ShoppingCartItems, ingredients, recipe_ingredients, shopping_cart_items,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    state::AppState,
};

pub const EMPTY_SHOPPING_LIST: &str = "Ваш список покупок пуст.";
pub const SHOPPING_LIST_HEADER: &str = "Список покупок:\n";
pub const SHOPPING_LIST_FILENAME: &str = "shopping_list.txt";

/// One line of the report, keyed by `(name, measurement_unit)`.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult)]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub total_amount: i64,
}

impl ShoppingListItem {
    fn line(&self) -> String {
        format!(
            "- {} ({}) — {}",
            self.name, self.measurement_unit, self.total_amount
        )
    }
}

/// Ingredients needed for every recipe in the user's cart, summed per
/// `(name, measurement_unit)` and ordered by name, then unit.
pub async fn aggregate_shopping_list<C>(db: &C, user_id: Uuid) -> AppResult<Vec<ShoppingListItem>>
where
    C: ConnectionTrait,
{
    let cart_rows: RelationDef = RecipeIngredients::belongs_to(ShoppingCartItems)
        .from(recipe_ingredients::Column::RecipeId)
        .to(shopping_cart_items::Column::RecipeId)
        .into();

    let items = RecipeIngredients::find()
        .select_only()
        .column_as(ingredients::Column::Name, "name")
        .column_as(ingredients::Column::MeasurementUnit, "measurement_unit")
        .column_as(
            Expr::col((recipe_ingredients::Entity, recipe_ingredients::Column::Amount)).sum(),
            "total_amount",
        )
        .join(
            JoinType::InnerJoin,
            recipe_ingredients::Relation::Ingredients.def(),
        )
        .join(JoinType::InnerJoin, cart_rows)
        .filter(shopping_cart_items::Column::UserId.eq(user_id))
        .group_by(ingredients::Column::Name)
        .group_by(ingredients::Column::MeasurementUnit)
        .order_by_asc(ingredients::Column::Name)
        .order_by_asc(ingredients::Column::MeasurementUnit)
        .into_model::<ShoppingListItem>()
        .all(db)
        .await?;

    Ok(items)
}

pub fn render_shopping_list(items: &[ShoppingListItem]) -> String {
    if items.is_empty() {
        return EMPTY_SHOPPING_LIST.to_string();
    }

    let mut lines = Vec::with_capacity(items.len() + 1);
    lines.push(SHOPPING_LIST_HEADER.to_string());
    lines.extend(items.iter().map(ShoppingListItem::line));
    lines.join("\n")
}

pub async fn shopping_list(state: &AppState, user: &AuthUser) -> AppResult<String> {
    let items = aggregate_shopping_list(&state.orm, user.user_id).await?;
    tracing::debug!(user_id = %user.user_id, lines = items.len(), "shopping list aggregated");
    Ok(render_shopping_list(&items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, unit: &str, total: i64) -> ShoppingListItem {
        ShoppingListItem {
            name: name.into(),
            measurement_unit: unit.into(),
            total_amount: total,
        }
    }

    #[test]
    fn empty_cart_renders_sentinel_only() {
        assert_eq!(render_shopping_list(&[]), "Ваш список покупок пуст.");
    }

    #[test]
    fn renders_header_then_lines_in_given_order() {
        let report = render_shopping_list(&[item("eggs", "шт", 3), item("flour", "g", 500)]);
        assert_eq!(
            report,
            "Список покупок:\n\n- eggs (шт) — 3\n- flour (g) — 500"
        );
    }

    #[test]
    fn each_item_is_one_line() {
        let report = render_shopping_list(&[
            item("milk", "ml", 250),
            item("salt", "g", 5),
            item("sugar", "g", 100),
        ]);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "Список покупок:");
        assert_eq!(lines[1], "");
        assert_eq!(&lines[2..], ["- milk (ml) — 250", "- salt (g) — 5", "- sugar (g) — 100"]);
    }
}
