use serde::{Deserialize, Deserializer};
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 6;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IngredientQuery {
    /// Case-insensitive name prefix.
    pub name: Option<String>,
}

// Query strings are flat: `serde(flatten)` would defeat number parsing in
// `serde_urlencoded`, so paging fields are repeated per query type.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RecipeQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub author: Option<Uuid>,
    #[serde(default, deserialize_with = "flag")]
    pub is_favorited: Option<bool>,
    #[serde(default, deserialize_with = "flag")]
    pub is_in_shopping_cart: Option<bool>,
}

impl RecipeQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SubscriptionQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub recipes_limit: Option<u64>,
}

impl SubscriptionQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RecipesLimitQuery {
    pub recipes_limit: Option<u64>,
}

/// Accepts `1`/`0` as well as `true`/`false`.
fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some("1") | Some("true") | Some("True") => Ok(Some(true)),
        Some("0") | Some("false") | Some("False") => Ok(Some(false)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected 0, 1, true or false, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        assert_eq!(Pagination::default().normalize(), (1, 6, 0));
        let p = Pagination {
            page: Some(3),
            limit: Some(500),
        };
        assert_eq!(p.normalize(), (3, 100, 200));
        let p = Pagination {
            page: Some(-4),
            limit: Some(0),
        };
        assert_eq!(p.normalize(), (1, 1, 0));
    }

    #[test]
    fn recipe_query_parses_numeric_flags() {
        let q: RecipeQuery =
            serde_urlencoded_from("is_favorited=1&is_in_shopping_cart=false&page=2");
        assert_eq!(q.is_favorited, Some(true));
        assert_eq!(q.is_in_shopping_cart, Some(false));
        assert_eq!(q.pagination().normalize().0, 2);
    }

    fn serde_urlencoded_from(query: &str) -> RecipeQuery {
        let uri: axum::http::Uri = format!("/recipes?{query}").parse().unwrap();
        axum::extract::Query::<RecipeQuery>::try_from_uri(&uri)
            .unwrap()
            .0
    }
}
