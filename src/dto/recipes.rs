use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Recipe;

/// Amounts arrive as wide integers so out-of-range values produce field errors
/// instead of a body rejection.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RecipeIngredientInput {
    pub id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRecipeRequest {
    pub ingredients: Vec<RecipeIngredientInput>,
    pub image: String,
    pub name: String,
    pub text: String,
    pub cooking_time: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateRecipeRequest {
    /// When present the recipe's ingredient set is replaced as a whole.
    pub ingredients: Option<Vec<RecipeIngredientInput>>,
    pub image: Option<String>,
    pub name: Option<String>,
    pub text: Option<String>,
    pub cooking_time: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct RecipeList {
    #[schema(value_type = Vec<Recipe>)]
    pub items: Vec<Recipe>,
}
