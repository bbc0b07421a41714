use axum::{
    Router,
    extract::State,
    response::Redirect,
    routing::get,
};

use crate::{error::AppResult, extract::AppPath, services::recipe_service, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/s/{code}", get(follow_short_link))
}

#[utoipa::path(
    get,
    path = "/s/{code}",
    params(
        ("code" = String, Path, description = "Code from a recipe's short link")
    ),
    responses(
        (status = 308, description = "Redirect to the recipe"),
        (status = 404, description = "Unknown code or recipe")
    ),
    tag = "Recipes"
)]
pub async fn follow_short_link(
    State(state): State<AppState>,
    AppPath(code): AppPath<String>,
) -> AppResult<Redirect> {
    let id = recipe_service::resolve_short_link(&state, &code).await?;
    Ok(Redirect::permanent(&format!("/api/recipes/{id}")))
}
