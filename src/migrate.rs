use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::{Config, StoreTarget};
use crate::db;

/// `docsearch init`: create the SQLite schema for the configured store.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let path = match config.store_target()? {
        StoreTarget::Sqlite { path } => path,
        StoreTarget::Postgrest { .. } => bail!(
            "init only manages SQLite stores; provision the '{}' and '{}' tables on the PostgREST backend directly",
            config.store.page_table,
            config.store.section_table
        ),
    };

    let pool = db::connect(&path).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the `page` and `page_section` tables. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS page (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_page_id INTEGER REFERENCES page(id),
            path TEXT NOT NULL UNIQUE,
            checksum TEXT,
            meta TEXT,
            type TEXT,
            source TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS page_section (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            page_id INTEGER NOT NULL REFERENCES page(id) ON DELETE CASCADE,
            slug TEXT,
            heading TEXT,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_page_section_page_id ON page_section(page_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_page_parent_page_id ON page(parent_page_id)")
        .execute(pool)
        .await?;

    Ok(())
}
