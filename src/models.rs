use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::{ingredients, recipes, users};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub email: String,
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

impl User {
    pub fn from_entity(model: users::Model, is_subscribed: bool) -> Self {
        Self {
            email: model.email,
            id: model.id,
            username: model.username,
            first_name: model.first_name,
            last_name: model.last_name,
            is_subscribed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Ingredient {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
}

impl From<ingredients::Model> for Ingredient {
    fn from(model: ingredients::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            measurement_unit: model.measurement_unit,
        }
    }
}

/// Ingredient as listed inside a recipe; `id` is the catalog id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecipeIngredient {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i16,
}

/// Minified recipe returned by membership toggles and subscription listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecipeShort {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub cooking_time: i16,
}

impl From<&recipes::Model> for RecipeShort {
    fn from(model: &recipes::Model) -> Self {
        Self {
            id: model.id,
            name: model.name.clone(),
            image: model.image.clone(),
            cooking_time: model.cooking_time,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Recipe {
    pub id: Uuid,
    pub author: User,
    pub ingredients: Vec<RecipeIngredient>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserWithRecipes {
    #[serde(flatten)]
    pub user: User,
    pub recipes: Vec<RecipeShort>,
    pub recipes_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShortLink {
    #[serde(rename = "short-link")]
    pub short_link: String,
}
