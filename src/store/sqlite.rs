//! SQLite-backed [`PageStore`] implementation.
//!
//! Pages live in `page`, sections in `page_section` with their embedding
//! stored as a little-endian `f32` BLOB. Similarity search is brute-force
//! cosine similarity computed in Rust over sections of completely indexed
//! pages.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Metadata, NewSection, PageUpsert, SectionMatch, StoredPage, StoredSection};

use super::{rank_matches, MatchQuery, PageStore};

const PAGE_COLUMNS: &str = "id, path, checksum, parent_page_id, meta, type, source";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path`, creating the schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open SQLite store at {}", path.display()))?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn page_from_row(row: &SqliteRow) -> Result<StoredPage> {
    let meta: Option<String> = row.get("meta");
    let meta = match meta {
        Some(json) => Some(serde_json::from_str::<Metadata>(&json)?),
        None => None,
    };
    Ok(StoredPage {
        id: row.get("id"),
        path: row.get("path"),
        checksum: row.get("checksum"),
        parent_page_id: row.get("parent_page_id"),
        meta,
        page_type: row.get("type"),
        source: row.get("source"),
    })
}

#[async_trait]
impl PageStore for SqliteStore {
    async fn find_page(&self, path: &str) -> Result<Option<StoredPage>> {
        let row = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM page WHERE path = ?"))
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(page_from_row).transpose()
    }

    async fn upsert_page(&self, page: &PageUpsert) -> Result<StoredPage> {
        let meta = page.meta.as_ref().map(serde_json::to_string).transpose()?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO page (path, checksum, parent_page_id, meta, type, source)
            VALUES (?, NULL, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                checksum = NULL,
                parent_page_id = excluded.parent_page_id,
                meta = excluded.meta,
                type = excluded.type,
                source = excluded.source
            RETURNING {PAGE_COLUMNS}
            "#
        ))
        .bind(&page.path)
        .bind(page.parent_page_id)
        .bind(meta)
        .bind(&page.page_type)
        .bind(&page.source)
        .fetch_one(&self.pool)
        .await?;
        page_from_row(&row)
    }

    async fn set_parent(&self, page_id: i64, parent_page_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE page SET parent_page_id = ? WHERE id = ?")
            .bind(parent_page_id)
            .bind(page_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_sections(&self, page_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM page_section WHERE page_id = ?")
            .bind(page_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_section(&self, section: &NewSection) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO page_section (page_id, slug, heading, content, token_count, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(section.page_id)
        .bind(&section.slug)
        .bind(&section.heading)
        .bind(&section.content)
        .bind(section.token_count)
        .bind(vec_to_blob(&section.embedding))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn commit_checksum(&self, page_id: i64, checksum: &str) -> Result<()> {
        sqlx::query("UPDATE page SET checksum = ? WHERE id = ?")
            .bind(checksum)
            .bind(page_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sections(&self, page_id: i64) -> Result<Vec<StoredSection>> {
        let rows = sqlx::query(
            r#"
            SELECT id, page_id, slug, heading, content, token_count, embedding
            FROM page_section
            WHERE page_id = ?
            ORDER BY id
            "#,
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                StoredSection {
                    id: row.get("id"),
                    page_id: row.get("page_id"),
                    slug: row.get("slug"),
                    heading: row.get("heading"),
                    content: row.get("content"),
                    token_count: row.get("token_count"),
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    async fn list_pages(&self) -> Result<Vec<StoredPage>> {
        let rows = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM page ORDER BY path"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(page_from_row).collect()
    }

    async fn match_sections(&self, query: MatchQuery<'_>) -> Result<Vec<SectionMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.page_id, p.path, s.slug, s.heading, s.content, s.embedding
            FROM page_section s
            JOIN page p ON p.id = s.page_id
            WHERE p.checksum IS NOT NULL AND length(s.content) >= ?
            "#,
        )
        .bind(query.min_content_length as i64)
        .fetch_all(&self.pool)
        .await?;

        let matches = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query.embedding, &blob_to_vec(&blob));
                (similarity > query.threshold).then(|| SectionMatch {
                    id: row.get("id"),
                    page_id: row.get("page_id"),
                    path: row.get("path"),
                    slug: row.get("slug"),
                    heading: row.get("heading"),
                    content: row.get("content"),
                    similarity,
                })
            })
            .collect();

        Ok(rank_matches(matches, query.count))
    }
}
