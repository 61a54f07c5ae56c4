use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool.
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool with sensible pool defaults.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_string());
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    info!("connecting to database");
    Database::connect(opt).await
}

/// Runs pending schema migrations.
pub async fn run_migrations(db: &DbPool) -> Result<(), DbErr> {
    info!("running migrations");
    migrations::Migrator::up(db, None).await
}
