use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest, SetPasswordRequest},
        ingredients::{CreateIngredientRequest, IngredientList},
        recipes::{CreateRecipeRequest, RecipeIngredientInput, RecipeList, UpdateRecipeRequest},
        subscriptions::SubscriptionList,
        users::UserList,
    },
    error::{ErrorBody, ErrorDetail},
    models::{Ingredient, Recipe, RecipeIngredient, RecipeShort, ShortLink, User, UserWithRecipes},
    response::{ApiResponse, Meta},
    routes::{
        auth, cart, favorites, health, ingredients, params, recipes, short_links, users,
    },
    validation::FieldErrors,
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::database_check,
        auth::register,
        auth::login,
        users::list_users,
        users::set_password,
        users::me,
        users::get_user,
        users::list_subscriptions,
        users::subscribe,
        users::unsubscribe,
        ingredients::list_ingredients,
        ingredients::get_ingredient,
        ingredients::create_ingredient,
        ingredients::delete_ingredient,
        recipes::list_recipes,
        recipes::get_recipe,
        recipes::create_recipe,
        recipes::update_recipe,
        recipes::delete_recipe,
        recipes::get_link,
        short_links::follow_short_link,
        favorites::add_favorite,
        favorites::remove_favorite,
        cart::add_to_cart,
        cart::remove_from_cart,
        cart::download_shopping_cart
    ),
    components(
        schemas(
            User,
            UserWithRecipes,
            Ingredient,
            Recipe,
            RecipeIngredient,
            RecipeShort,
            ShortLink,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            SetPasswordRequest,
            UserList,
            CreateIngredientRequest,
            IngredientList,
            CreateRecipeRequest,
            UpdateRecipeRequest,
            RecipeIngredientInput,
            RecipeList,
            SubscriptionList,
            FieldErrors,
            ErrorBody,
            ErrorDetail,
            params::Pagination,
            params::IngredientQuery,
            params::RecipeQuery,
            params::SubscriptionQuery,
            Meta,
            ApiResponse<User>,
            ApiResponse<Recipe>,
            ApiResponse<RecipeList>,
            ApiResponse<SubscriptionList>,
            ApiResponse<UserList>,
            ApiResponse<LoginResponse>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Auth", description = "Registration and login"),
        (name = "Users", description = "Profiles and subscriptions"),
        (name = "Ingredients", description = "Ingredient catalog"),
        (name = "Recipes", description = "Recipe endpoints"),
        (name = "Favorites", description = "Favorite recipes"),
        (name = "Shopping cart", description = "Shopping cart and shopping list download"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
