use std::env;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    /// Public origin used when building recipe short links.
    pub short_link_base: String,
    /// Recipes embedded per author in subscription listings.
    pub recipes_limit: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);
        let jwt_ttl_hours = parse_or("JWT_TTL_HOURS", 24);
        let short_link_base = env::var("SHORT_LINK_BASE")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));
        let recipes_limit = parse_or("RECIPES_LIMIT", 3);
        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            jwt_ttl_hours,
            short_link_base: short_link_base.trim_end_matches('/').to_string(),
            recipes_limit,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
