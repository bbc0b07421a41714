use serde::Serialize;
use utoipa::ToSchema;

use crate::models::UserWithRecipes;

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct SubscriptionList {
    #[schema(value_type = Vec<UserWithRecipes>)]
    pub items: Vec<UserWithRecipes>,
}
