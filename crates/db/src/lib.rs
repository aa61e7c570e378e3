use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

pub mod entities;
pub mod models;
mod retry;
pub mod types;

pub use retry::retry_on_sqlite_busy;
pub use sea_orm::{self, ConnectionTrait, TransactionTrait};
pub use sea_orm::DbErr as DatabaseError;

#[derive(Clone)]
pub struct DbService {
    pub conn: DatabaseConnection,
}

impl DbService {
    /// Connects to the given database URL (e.g. `sqlite://mailroom.db?mode=rwc`
    /// or `sqlite::memory:`) and brings the schema up to date.
    pub async fn new(database_url: &str) -> Result<Self, DbErr> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options.sqlx_logging(false);
        let conn = Database::connect(options).await?;
        db_migration::Migrator::up(&conn, None).await?;
        tracing::debug!("database ready at {database_url}");
        Ok(Self { conn })
    }

    /// Fresh in-memory database, used by tests and local experimentation.
    pub async fn new_in_memory() -> Result<Self, DbErr> {
        Self::new("sqlite::memory:").await
    }
}
