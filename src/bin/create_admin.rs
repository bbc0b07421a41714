use anyhow::{Context, bail};
use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use clap::Parser;
use foodgram_api::{
    db::{create_orm_conn, run_migrations},
    middleware::auth::ROLE_ADMIN,
    services::auth_service::MIN_PASSWORD_CHARS,
};
use uuid::Uuid;

/// Creates an admin account, or promotes and re-keys an existing one with the same email.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    email: String,

    username: String,

    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let Args {
        email,
        username,
        password,
    } = Args::parse();
    if password.chars().count() < MIN_PASSWORD_CHARS {
        bail!("password must be at least {MIN_PASSWORD_CHARS} characters");
    }

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;
    let pool = orm.get_postgres_connection_pool();

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, username, first_name, last_name, password_hash, role)
        VALUES ($1, $2, $3, '', '', $4, $5)
        ON CONFLICT (email) DO UPDATE
            SET role = EXCLUDED.role, password_hash = EXCLUDED.password_hash
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email.trim())
    .bind(username.trim())
    .bind(password_hash)
    .bind(ROLE_ADMIN)
    .fetch_one(pool)
    .await
    .with_context(|| format!("cannot create admin {email}"))?;

    println!("Ensured admin {email} ({id})");
    Ok(())
}
