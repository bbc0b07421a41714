pub mod audit_logs;
pub mod favorites;
pub mod ingredients;
pub mod recipe_ingredients;
pub mod recipes;
pub mod shopping_cart_items;
pub mod subscriptions;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use favorites::Entity as Favorites;
pub use ingredients::Entity as Ingredients;
pub use recipe_ingredients::Entity as RecipeIngredients;
pub use recipes::Entity as Recipes;
pub use shopping_cart_items::Entity as ShoppingCartItems;
pub use subscriptions::Entity as Subscriptions;
pub use users::Entity as Users;
