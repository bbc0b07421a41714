use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, RuntimeErr, SqlErr};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::validation::FieldErrors;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    /// Business-rule rejection such as a duplicate membership.
    #[error("{0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Turns a unique-constraint violation into a conflict carrying `message`;
    /// any other database failure stays an ORM error.
    pub fn conflict_on_unique(err: DbErr, message: impl Into<String>) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => AppError::Conflict(message.into()),
            _ => AppError::OrmError(err),
        }
    }

    /// Same as [`AppError::conflict_on_unique`] for foreign-key violations,
    /// e.g. deleting a row that is still referenced.
    pub fn conflict_on_reference(err: DbErr, message: impl Into<String>) -> Self {
        match err.sql_err() {
            Some(SqlErr::ForeignKeyConstraintViolation(_)) => AppError::Conflict(message.into()),
            _ => AppError::OrmError(err),
        }
    }
}

/// Unique, foreign-key, check and not-null violations raised through the ORM.
pub fn is_integrity_violation(err: &DbErr) -> bool {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(inner)) | DbErr::Query(RuntimeErr::SqlxError(inner)) => {
            is_sqlx_integrity_violation(inner)
        }
        _ => false,
    }
}

fn is_sqlx_integrity_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => !matches!(db.kind(), sqlx::error::ErrorKind::Other),
        _ => false,
    }
}

#[derive(Serialize, ToSchema)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message(String),
    Fields(FieldErrors),
}

/// Body of every error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub errors: ErrorDetail,
}

const CONFLICT_MESSAGE: &str = "Conflicting state, the request violates a data constraint";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, errors) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, ErrorDetail::Message(self.to_string())),
            AppError::BadRequest(message) | AppError::Conflict(message) => {
                (StatusCode::BAD_REQUEST, ErrorDetail::Message(message))
            }
            AppError::Validation(fields) => (StatusCode::BAD_REQUEST, ErrorDetail::Fields(fields)),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::Message("Authentication credentials were not provided".into()),
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, ErrorDetail::Message(self.to_string())),
            AppError::OrmError(ref err) if is_integrity_violation(err) => {
                tracing::warn!(error = %err, "constraint violation surfaced as conflict");
                (StatusCode::BAD_REQUEST, ErrorDetail::Message(CONFLICT_MESSAGE.into()))
            }
            AppError::DbError(ref err) if is_sqlx_integrity_violation(err) => {
                tracing::warn!(error = %err, "constraint violation surfaced as conflict");
                (StatusCode::BAD_REQUEST, ErrorDetail::Message(CONFLICT_MESSAGE.into()))
            }
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                tracing::error!(error = ?self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetail::Message(self.to_string()),
                )
            }
        };

        (status, axum::Json(ErrorBody { errors })).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (AppError::NotFound, StatusCode::NOT_FOUND),
            (AppError::Conflict("dup".into()), StatusCode::BAD_REQUEST),
            (AppError::Validation(FieldErrors::new()), StatusCode::BAD_REQUEST),
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AppError::Forbidden, StatusCode::FORBIDDEN),
            (
                AppError::OrmError(DbErr::Custom("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn conflict_body_carries_message() {
        let response = AppError::Conflict("Рецепт уже в списке покупок.".into()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "errors": "Рецепт уже в списке покупок." }));
    }

    #[derive(Debug)]
    struct ConstraintError(sqlx::error::ErrorKind);

    impl std::fmt::Display for ConstraintError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("violates constraint")
        }
    }

    impl std::error::Error for ConstraintError {}

    impl sqlx::error::DatabaseError for ConstraintError {
        fn message(&self) -> &str {
            "violates constraint"
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            match &self.0 {
                sqlx::error::ErrorKind::CheckViolation => sqlx::error::ErrorKind::CheckViolation,
                sqlx::error::ErrorKind::UniqueViolation => sqlx::error::ErrorKind::UniqueViolation,
                _ => sqlx::error::ErrorKind::Other,
            }
        }
    }

    fn orm_error(kind: sqlx::error::ErrorKind) -> DbErr {
        DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(Box::new(
            ConstraintError(kind),
        ))))
    }

    #[test]
    fn check_violations_through_the_orm_are_bad_requests() {
        let err = orm_error(sqlx::error::ErrorKind::CheckViolation);
        assert!(is_integrity_violation(&err));
        let response = AppError::OrmError(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(is_integrity_violation(&orm_error(sqlx::error::ErrorKind::UniqueViolation)));
        assert!(!is_integrity_violation(&orm_error(sqlx::error::ErrorKind::Other)));
        assert!(!is_integrity_violation(&DbErr::Custom("boom".into())));
    }

    #[test]
    fn non_constraint_errors_are_not_conflicts() {
        let err = AppError::conflict_on_unique(DbErr::Custom("boom".into()), "dup");
        assert!(matches!(err, AppError::OrmError(_)));
    }
}
