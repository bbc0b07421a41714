use std::collections::HashSet;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use foodgram_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    dto::{
        auth::{LoginRequest, RegisterRequest, SetPasswordRequest},
        ingredients::CreateIngredientRequest,
        recipes::{CreateRecipeRequest, RecipeIngredientInput, UpdateRecipeRequest},
    },
    entity::{AuditLogs, audit_logs, users::ActiveModel as UserActive},
    error::AppError,
    middleware::auth::{AuthUser, ROLE_ADMIN, ROLE_USER, issue_token},
    models::{Ingredient, Recipe},
    routes::{
        create_app_router,
        params::{Pagination, RecipeQuery, SubscriptionQuery},
    },
    services::{
        auth_service::{self, WRONG_CURRENT_PASSWORD},
        cart_service::{self, ALREADY_IN_CART, NOT_IN_CART},
        favorite_service, import_service, ingredient_service, recipe_service,
        shopping_list_service::{EMPTY_SHOPPING_LIST, shopping_list},
        subscription_service::{self, SELF_SUBSCRIPTION},
        user_service,
    },
    state::AppState,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    Statement,
};
use tower::ServiceExt;
use uuid::Uuid;

// Scenarios share one database and run sequentially inside a single test.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shopping_cart_aggregation_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let admin = AuthUser {
        user_id: create_user(&state, "admin", ROLE_ADMIN).await?,
        role: ROLE_ADMIN.into(),
    };
    let author = AuthUser {
        user_id: create_user(&state, "author", ROLE_USER).await?,
        role: ROLE_USER.into(),
    };
    let cook = AuthUser {
        user_id: create_user(&state, "cook", ROLE_USER).await?,
        role: ROLE_USER.into(),
    };

    let flour = ingredient(&state, &admin, "flour", "g").await?;
    let eggs = ingredient(&state, &admin, "eggs", "шт").await?;
    let milk = ingredient(&state, &admin, "milk", "ml").await?;

    let pancakes = recipe(&state, &author, "Pancakes", &[(flour.id, 200), (eggs.id, 2)]).await?;
    let bread = recipe(&state, &author, "Bread", &[(flour.id, 300), (eggs.id, 1)]).await?;

    // Aggregation sums amounts per (name, unit) across every recipe in the cart.
    assert_eq!(shopping_list(&state, &cook).await?, EMPTY_SHOPPING_LIST);
    cart_service::add_to_cart(&state, &cook, pancakes.id).await?;
    cart_service::add_to_cart(&state, &cook, bread.id).await?;
    assert_eq!(
        shopping_list(&state, &cook).await?,
        "Список покупок:\n\n- eggs (шт) — 3\n- flour (g) — 500"
    );

    // The download endpoint serves the same text as an attachment.
    let token = issue_token(cook.user_id, ROLE_USER, &state.config.jwt_secret, 1)?;
    let response = create_app_router()
        .with_state(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/recipes/download_shopping_cart")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"shopping_list.txt\""
    );
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(
        std::str::from_utf8(&body)?,
        "Список покупок:\n\n- eggs (шт) — 3\n- flour (g) — 500"
    );

    // Other users' carts are untouched.
    assert_eq!(shopping_list(&state, &author).await?, EMPTY_SHOPPING_LIST);

    // Adding twice is a conflict, removing twice too.
    let again = cart_service::add_to_cart(&state, &cook, pancakes.id).await;
    assert!(matches!(again, Err(AppError::Conflict(msg)) if msg == ALREADY_IN_CART));
    cart_service::remove_from_cart(&state, &cook, bread.id).await?;
    let again = cart_service::remove_from_cart(&state, &cook, bread.id).await;
    assert!(matches!(again, Err(AppError::Conflict(msg)) if msg == NOT_IN_CART));
    assert_eq!(
        shopping_list(&state, &cook).await?,
        "Список покупок:\n\n- eggs (шт) — 2\n- flour (g) — 200"
    );

    let cart_events = AuditLogs::find()
        .filter(audit_logs::Column::UserId.eq(cook.user_id))
        .filter(audit_logs::Column::Action.eq("cart_add"))
        .count(&state.orm)
        .await?;
    assert_eq!(cart_events, 2);

    // Of two racing adds exactly one wins.
    let (first, second) = tokio::join!(
        cart_service::add_to_cart(&state, &author, bread.id),
        cart_service::add_to_cart(&state, &author, bread.id),
    );
    assert_eq!(
        [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
        1
    );
    assert!(matches!(
        first.err().or(second.err()),
        Some(AppError::Conflict(_))
    ));

    // A failed replacement leaves the previous ingredient set in place.
    let bad = recipe_service::update_recipe(
        &state,
        &author,
        pancakes.id,
        UpdateRecipeRequest {
            ingredients: Some(vec![
                input(milk.id, 100),
                input(Uuid::new_v4(), 1),
            ]),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(bad, Err(AppError::Validation(_))));
    let unchanged = recipe_service::get_recipe(&state, None, pancakes.id).await?;
    assert_eq!(ingredient_ids(unchanged.data.as_ref()), HashSet::from([flour.id, eggs.id]));

    // Readers never observe a recipe midway through replacement.
    let reader_state = state.clone();
    let recipe_id = pancakes.id;
    let reader = tokio::spawn(async move {
        let mut smallest = usize::MAX;
        for _ in 0..50 {
            let resp = recipe_service::get_recipe(&reader_state, None, recipe_id).await?;
            let count = resp.data.map(|r| r.ingredients.len()).unwrap_or(0);
            smallest = smallest.min(count);
        }
        Ok::<usize, AppError>(smallest)
    });
    for round in 0..10 {
        let items = if round % 2 == 0 {
            vec![input(milk.id, 250)]
        } else {
            vec![input(flour.id, 200), input(eggs.id, 2)]
        };
        recipe_service::update_recipe(
            &state,
            &author,
            pancakes.id,
            UpdateRecipeRequest {
                ingredients: Some(items),
                ..Default::default()
            },
        )
        .await?;
    }
    assert!(reader.await?? >= 1);

    // Only the author may edit.
    let foreign = recipe_service::update_recipe(
        &state,
        &cook,
        pancakes.id,
        UpdateRecipeRequest {
            name: Some("Stolen".into()),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(foreign, Err(AppError::Forbidden)));

    // Ingredients used by a recipe cannot be deleted; unused ones can.
    let in_use = ingredient_service::delete_ingredient(&state, &admin, flour.id).await;
    assert!(matches!(in_use, Err(AppError::Conflict(_))));
    let spare = ingredient(&state, &admin, "saffron", "g").await?;
    ingredient_service::delete_ingredient(&state, &admin, spare.id).await?;

    // The catalog rejects case-insensitive duplicates.
    let duplicate = ingredient(&state, &admin, "FLOUR", "G").await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    // Bulk import skips rows that already exist ignoring case.
    let parsed = import_service::parse_json(
        r#"[
            {"name": "Flour", "measurement_unit": "g"},
            {"name": "salt", "measurement_unit": "g"},
            {"name": "Salt", "measurement_unit": "G"},
            {"name": "", "measurement_unit": "g"}
        ]"#,
    )?;
    let report = import_service::import_ingredients(&state.orm, parsed).await?;
    assert_eq!((report.loaded, report.skipped, report.invalid.len()), (1, 2, 1));
    let salts = ingredient_service::list_ingredients(&state, Some("sal")).await?;
    assert_eq!(salts.len(), 1);

    // Favorites and cart flags show up for the viewer only.
    favorite_service::add_favorite(&state, &cook, bread.id).await?;
    let favorited = recipe_service::list_recipes(
        &state,
        Some(&cook),
        RecipeQuery {
            is_favorited: Some(true),
            ..Default::default()
        },
    )
    .await?;
    let favorited = favorited.data.map(|list| list.items).unwrap_or_default();
    assert_eq!(favorited.len(), 1);
    assert!(favorited[0].is_favorited);
    assert!(!favorited[0].is_in_shopping_cart);

    // Subscriptions embed the author's recipes, trimmed to the limit.
    let followed = subscription_service::subscribe(&state, &cook, author.user_id, Some(1)).await?;
    assert!(followed.user.is_subscribed);
    assert_eq!((followed.recipes.len(), followed.recipes_count), (1, 2));
    let again = subscription_service::subscribe(&state, &cook, author.user_id, None).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
    let own = subscription_service::subscribe(&state, &author, author.user_id, None).await;
    assert!(matches!(own, Err(AppError::Conflict(msg)) if msg == SELF_SUBSCRIPTION));
    let listed =
        subscription_service::list_subscriptions(&state, &cook, SubscriptionQuery::default())
            .await?;
    assert_eq!(listed.data.map(|list| list.items.len()), Some(1));

    // A zero limit keeps the count but embeds no recipes; authors without
    // recipes report zero.
    let trimmed = subscription_service::list_subscriptions(
        &state,
        &cook,
        SubscriptionQuery {
            recipes_limit: Some(0),
            ..Default::default()
        },
    )
    .await?;
    let trimmed = trimmed.data.map(|list| list.items).unwrap_or_default();
    assert_eq!((trimmed[0].recipes.len(), trimmed[0].recipes_count), (0, 2));
    let quiet = subscription_service::subscribe(&state, &cook, admin.user_id, None).await?;
    assert_eq!((quiet.recipes.len(), quiet.recipes_count), (0, 0));
    subscription_service::unsubscribe(&state, &cook, admin.user_id).await?;

    // The user list is ordered by id and flags the viewer's subscriptions.
    let everyone = user_service::list_users(&state, Some(&cook), Pagination::default()).await?;
    assert_eq!(everyone.meta.as_ref().and_then(|m| m.total), Some(3));
    let everyone = everyone.data.map(|list| list.items).unwrap_or_default();
    let ids: Vec<Uuid> = everyone.iter().map(|u| u.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    let subscribed: Vec<Uuid> = everyone
        .iter()
        .filter(|u| u.is_subscribed)
        .map(|u| u.id)
        .collect();
    assert_eq!(subscribed, vec![author.user_id]);
    let second_page = user_service::list_users(
        &state,
        None,
        Pagination {
            page: Some(2),
            limit: Some(2),
        },
    )
    .await?;
    assert_eq!(second_page.data.map(|list| list.items.len()), Some(1));

    subscription_service::unsubscribe(&state, &cook, author.user_id).await?;

    // Changing the password needs the current one and a long enough new one.
    let chef = auth_service::register_user(
        &state,
        RegisterRequest {
            email: "chef@example.com".into(),
            username: "chef".into(),
            first_name: "Chef".into(),
            last_name: "Test".into(),
            password: "old-password".into(),
        },
    )
    .await?
    .data
    .ok_or_else(|| anyhow::anyhow!("user missing from response"))?;
    let chef = AuthUser {
        user_id: chef.id,
        role: ROLE_USER.into(),
    };
    let wrong = auth_service::set_password(
        &state,
        &chef,
        SetPasswordRequest {
            current_password: "not-my-password".into(),
            new_password: "short".into(),
        },
    )
    .await;
    match wrong {
        Err(AppError::Validation(errors)) => {
            assert_eq!(
                errors.get("current_password"),
                Some(&[WRONG_CURRENT_PASSWORD.to_string()][..])
            );
            assert!(errors.get("new_password").is_some());
        }
        other => panic!("expected validation errors, got {other:?}"),
    }
    auth_service::set_password(
        &state,
        &chef,
        SetPasswordRequest {
            current_password: "old-password".into(),
            new_password: "new-password".into(),
        },
    )
    .await?;
    let old_login = auth_service::login_user(&state, login("chef@example.com", "old-password")).await;
    assert!(matches!(old_login, Err(AppError::BadRequest(_))));
    auth_service::login_user(&state, login("chef@example.com", "new-password")).await?;

    // Deleting a recipe drops it from every cart.
    recipe_service::delete_recipe(&state, &author, pancakes.id).await?;
    assert_eq!(shopping_list(&state, &cook).await?, EMPTY_SHOPPING_LIST);

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    orm.execute(Statement::from_string(
        orm.get_database_backend(),
        "TRUNCATE audit_logs, subscriptions, favorites, shopping_cart_items, \
         recipe_ingredients, recipes, ingredients, users CASCADE"
            .to_string(),
    ))
    .await?;

    Ok(AppState {
        orm,
        config: AppConfig {
            database_url: database_url.to_string(),
            host: "127.0.0.1".into(),
            port: 0,
            jwt_secret: "test-secret".into(),
            jwt_ttl_hours: 1,
            short_link_base: "http://localhost:3000".into(),
            recipes_limit: 3,
        },
    })
}

async fn create_user(state: &AppState, username: &str, role: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{username}@example.com")),
        username: Set(username.into()),
        first_name: Set(username.into()),
        last_name: Set("Test".into()),
        password_hash: Set("not-a-real-hash".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(user.id)
}

async fn ingredient(
    state: &AppState,
    admin: &AuthUser,
    name: &str,
    unit: &str,
) -> Result<Ingredient, AppError> {
    ingredient_service::create_ingredient(
        state,
        admin,
        CreateIngredientRequest {
            name: name.into(),
            measurement_unit: unit.into(),
        },
    )
    .await
}

async fn recipe(
    state: &AppState,
    author: &AuthUser,
    name: &str,
    items: &[(Uuid, i64)],
) -> anyhow::Result<Recipe> {
    let resp = recipe_service::create_recipe(
        state,
        author,
        CreateRecipeRequest {
            ingredients: items.iter().map(|(id, amount)| input(*id, *amount)).collect(),
            image: "data:image/png;base64,AAAA".into(),
            name: name.into(),
            text: "Mix and bake.".into(),
            cooking_time: 20,
        },
    )
    .await?;
    resp.data.ok_or_else(|| anyhow::anyhow!("recipe missing from response"))
}

fn login(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.into(),
        password: password.into(),
    }
}

fn input(id: Uuid, amount: i64) -> RecipeIngredientInput {
    RecipeIngredientInput { id, amount }
}

fn ingredient_ids(recipe: Option<&Recipe>) -> HashSet<Uuid> {
    recipe
        .map(|r| r.ingredients.iter().map(|i| i.id).collect())
        .unwrap_or_default()
}
