use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use password_hash::rand_core::OsRng;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::auth::{LoginRequest, LoginResponse, RegisterRequest, SetPasswordRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ROLE_USER, issue_token},
    models::User,
    response::{ApiResponse, Meta},
    state::AppState,
    validation::FieldErrors,
};

pub const MAX_EMAIL_CHARS: usize = 254;
pub const MAX_NAME_CHARS: usize = 150;
pub const MIN_PASSWORD_CHARS: usize = 8;
pub const WRONG_CURRENT_PASSWORD: &str = "Неверный текущий пароль.";

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    username: String,
    first_name: String,
    last_name: String,
    password_hash: String,
    role: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            email: row.email,
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            is_subscribed: false,
        }
    }
}

pub fn validate_registration(payload: &RegisterRequest) -> FieldErrors {
    let mut errors = FieldErrors::new();

    errors.check_text("email", &payload.email, Some(MAX_EMAIL_CHARS));
    let email_ok = payload
        .email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !payload.email.trim().is_empty() && !email_ok {
        errors.add("email", "Введите правильный адрес электронной почты.");
    }

    errors.check_text("username", &payload.username, Some(MAX_NAME_CHARS));
    if payload.username.eq_ignore_ascii_case("me") {
        errors.add("username", "Имя пользователя 'me' запрещено.");
    }
    if !payload
        .username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '.' | '@' | '+' | '-' | '_'))
    {
        errors.add(
            "username",
            "Допустимы только буквы, цифры и символы @/./+/-/_.",
        );
    }

    errors.check_text("first_name", &payload.first_name, Some(MAX_NAME_CHARS));
    errors.check_text("last_name", &payload.last_name, Some(MAX_NAME_CHARS));

    check_password(&mut errors, "password", &payload.password);

    errors
}

fn check_password(errors: &mut FieldErrors, field: &str, password: &str) {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        errors.add(
            field,
            format!("Пароль должен содержать не менее {MIN_PASSWORD_CHARS} символов."),
        );
    }
}

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

fn password_matches(password: &str, stored_hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    let mut errors = validate_registration(&payload);
    let pool = state.pool();

    let email_taken: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE lower(email) = lower($1)")
            .bind(payload.email.trim())
            .fetch_optional(pool)
            .await?;
    if email_taken.is_some() {
        errors.add("email", "Пользователь с таким email уже существует.");
    }

    let username_taken: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = $1")
            .bind(payload.username.as_str())
            .fetch_optional(pool)
            .await?;
    if username_taken.is_some() {
        errors.add("username", "Пользователь с таким именем уже существует.");
    }
    errors.into_result()?;

    let password_hash = hash_password(&payload.password)?;

    let row: UserRow = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, username, first_name, last_name, password_hash, role)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.email.trim())
    .bind(payload.username.as_str())
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(password_hash)
    .bind(ROLE_USER)
    .fetch_one(pool)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict("Пользователь с таким email или именем уже существует.".into())
        }
        _ => AppError::DbError(err),
    })?;

    audit::record(
        state,
        row.id,
        "user_register",
        "users",
        serde_json::json!({ "user_id": row.id }),
    )
    .await;

    Ok(ApiResponse::success("User created", User::from(row), None))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { email, password } = payload;
    let user: Option<UserRow> =
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE lower(email) = lower($1)")
            .bind(email.trim())
            .fetch_optional(state.pool())
            .await?;

    let user = match user {
        Some(u) => u,
        None => return Err(AppError::BadRequest("Invalid email or password".into())),
    };

    if !password_matches(&password, &user.password_hash)? {
        return Err(AppError::BadRequest("Invalid email or password".into()));
    }

    let token = issue_token(
        user.id,
        &user.role,
        &state.config.jwt_secret,
        state.config.jwt_ttl_hours,
    )?;

    audit::record(
        state,
        user.id,
        "user_login",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Logged in",
        LoginResponse { token },
        Some(Meta::empty()),
    ))
}

/// Replaces the caller's password after checking the current one.
pub async fn set_password(
    state: &AppState,
    user: &AuthUser,
    payload: SetPasswordRequest,
) -> AppResult<()> {
    let pool = state.pool();
    let stored: Option<(String,)> = sqlx::query_as("SELECT password_hash FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(pool)
        .await?;
    let (stored_hash,) = stored.ok_or(AppError::Unauthorized)?;

    let mut errors = FieldErrors::new();
    check_password(&mut errors, "new_password", &payload.new_password);
    if !password_matches(&payload.current_password, &stored_hash)? {
        errors.add("current_password", WRONG_CURRENT_PASSWORD);
    }
    errors.into_result()?;

    let password_hash = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
        .bind(password_hash)
        .bind(user.user_id)
        .execute(pool)
        .await?;

    audit::record(
        state,
        user.user_id,
        "user_set_password",
        "users",
        serde_json::json!({ "user_id": user.user_id }),
    )
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, username: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            username: username.into(),
            first_name: "Вася".into(),
            last_name: "Пупкин".into(),
            password: password.into(),
        }
    }

    #[test]
    fn accepts_well_formed_registration() {
        let errors = validate_registration(&request("cook@example.com", "cook_42", "s3cretpass"));
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn rejects_reserved_username_and_short_password() {
        let errors = validate_registration(&request("cook@example.com", "Me", "short"));
        assert!(errors.get("username").is_some());
        assert!(errors.get("password").is_some());
        assert!(errors.get("email").is_none());
    }

    #[test]
    fn rejects_malformed_email_and_username_symbols() {
        let errors = validate_registration(&request("not-an-email", "bad name!", "longenough"));
        assert!(errors.get("email").is_some());
        assert!(errors.get("username").is_some());
    }

    #[test]
    fn stored_hash_verifies_only_its_password() {
        let hash = hash_password("s3cretpass").unwrap();
        assert!(password_matches("s3cretpass", &hash).unwrap());
        assert!(!password_matches("s3cretpasS", &hash).unwrap());
        assert!(password_matches("s3cretpass", "not-a-hash").is_err());
    }
}
