use anyhow::anyhow;
use axum::Router;
use deadpool::managed::Pool;
use diesel::{pg::PgConnection, Connection};
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncPgConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod schema;

pub type DbPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn connect_to_db(db_url: &str) -> anyhow::Result<DbPool> {
    let db_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    Ok(Pool::builder(db_config).build()?)
}

/// Applies pending migrations on a dedicated blocking connection.
pub async fn run_migrations(db_url: &str) -> anyhow::Result<()> {
    let db_url = db_url.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut conn = PgConnection::establish(&db_url)?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("failed to run migrations: {e}"))?;
        for version in applied {
            tracing::info!(%version, "applied migration");
        }
        Ok(())
    })
    .await?
}

pub fn app() -> Router {
    api::app()
}
