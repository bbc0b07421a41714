//! Request extractors whose rejections render through [`AppError`].
//!
//! axum's own `Json`, `Path` and `Query` answer malformed input with a
//! plain-text 4xx; these wrappers keep every error body in the
//! `{"errors": …}` shape.

use axum::extract::{
    FromRequest, FromRequestParts,
    rejection::{JsonRejection, PathRejection, QueryRejection},
};

use crate::{
    error::AppError,
    validation::{FieldErrors, NON_FIELD_ERRORS, REQUIRED_FIELD},
};

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => AppError::Validation(deserialize_errors(
                &err.body_text(),
                "target type: ",
            )),
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(deserialize_errors(
            &rejection.body_text(),
            "query string: ",
        ))
    }
}

/// Ids in the URL that do not parse can never name an existing row.
impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(rejection = %rejection.body_text(), "unusable path parameter");
        AppError::NotFound
    }
}

/// Turns a serde failure such as ``missing field `cooking_time` `` or
/// `ingredients[0].amount: invalid type: …` into a message under the
/// top-level field it concerns.
pub fn deserialize_errors(text: &str, after: &str) -> FieldErrors {
    let detail = text.split_once(after).map_or(text, |(_, rest)| rest);
    let detail = detail.split(" at line ").next().unwrap_or(detail).trim();

    let mut errors = FieldErrors::new();
    match detail.split_once(": ") {
        Some((path, message)) if !path.is_empty() && !path.contains(' ') => {
            let field = path.split(['.', '[']).next().unwrap_or(path);
            errors.add(field, message);
        }
        _ => match detail
            .strip_prefix("missing field `")
            .and_then(|rest| rest.split_once('`'))
        {
            Some((field, _)) => errors.add(field, REQUIRED_FIELD),
            None => errors.add(NON_FIELD_ERRORS, detail),
        },
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

    #[test]
    fn missing_top_level_field_is_required() {
        let errors = deserialize_errors(
            &format!("{PREFIX}missing field `cooking_time` at line 1 column 80"),
            "target type: ",
        );
        assert_eq!(
            errors.get("cooking_time"),
            Some(&[REQUIRED_FIELD.to_string()][..])
        );
    }

    #[test]
    fn nested_errors_land_on_the_outer_field() {
        let errors = deserialize_errors(
            &format!(
                "{PREFIX}ingredients[0].amount: invalid type: string \"a lot\", expected i64 at line 1 column 42"
            ),
            "target type: ",
        );
        assert_eq!(
            errors.get("ingredients"),
            Some(&["invalid type: string \"a lot\", expected i64".to_string()][..])
        );
    }

    #[test]
    fn query_errors_name_the_parameter() {
        let errors = deserialize_errors(
            "Failed to deserialize query string: limit: invalid digit found in string",
            "query string: ",
        );
        assert!(errors.get("limit").is_some());
    }

    #[test]
    fn root_type_errors_are_non_field() {
        let errors = deserialize_errors(
            &format!("{PREFIX}invalid type: sequence, expected struct CreateRecipeRequest at line 1 column 0"),
            "target type: ",
        );
        assert!(errors.get(NON_FIELD_ERRORS).is_some());
    }
}
