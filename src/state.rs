use sea_orm::DatabaseConnection;

use crate::{config::AppConfig, db::DbPool};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub config: AppConfig,
}

impl AppState {
    /// Raw sqlx pool underneath the ORM connection.
    pub fn pool(&self) -> &DbPool {
        self.orm.get_postgres_connection_pool()
    }
}
