use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Ingredient;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIngredientRequest {
    pub name: String,
    pub measurement_unit: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct IngredientList {
    #[schema(value_type = Vec<Ingredient>)]
    pub items: Vec<Ingredient>,
}
