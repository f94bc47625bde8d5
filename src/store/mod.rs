//! Storage abstraction for pages and their sections.
//!
//! The [`PageStore`] trait covers exactly what the sync engine and the query
//! path need. Backends:
//!
//! | Backend | Module | Selected by |
//! |---------|--------|-------------|
//! | SQLite | [`sqlite`] | `store.url = "sqlite:<path>"` |
//! | PostgREST | [`postgrest`] | `store.url = "https://…"` + service key |
//! | In-memory | [`memory`] | tests |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod postgrest;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Config, StoreTarget};
use crate::models::{NewSection, PageUpsert, SectionMatch, StoredPage, StoredSection};

pub use memory::InMemoryStore;
pub use postgrest::PostgrestStore;
pub use sqlite::SqliteStore;

/// Parameters for a similarity query over stored sections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchQuery<'a> {
    pub embedding: &'a [f32],
    pub threshold: f32,
    pub count: usize,
    pub min_content_length: usize,
}

/// Persistent store of pages (keyed by path) and their sections.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_page`](PageStore::find_page) | Look up a page by path |
/// | [`upsert_page`](PageStore::upsert_page) | Insert or update a page, clearing its checksum |
/// | [`set_parent`](PageStore::set_parent) | Re-link a page to its parent |
/// | [`delete_sections`](PageStore::delete_sections) | Remove every section of a page |
/// | [`insert_section`](PageStore::insert_section) | Add one section with its embedding |
/// | [`commit_checksum`](PageStore::commit_checksum) | Mark a page as completely indexed |
/// | [`sections`](PageStore::sections) | Sections of one page, in insertion order |
/// | [`list_pages`](PageStore::list_pages) | All pages, ordered by path |
/// | [`match_sections`](PageStore::match_sections) | Similarity search |
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn find_page(&self, path: &str) -> Result<Option<StoredPage>>;

    /// Insert or update the page keyed by `page.path`.
    ///
    /// The stored checksum is always set to `NULL`; the id of an existing
    /// page is preserved.
    async fn upsert_page(&self, page: &PageUpsert) -> Result<StoredPage>;

    async fn set_parent(&self, page_id: i64, parent_page_id: Option<i64>) -> Result<()>;

    async fn delete_sections(&self, page_id: i64) -> Result<()>;

    /// Insert one section and return its id.
    async fn insert_section(&self, section: &NewSection) -> Result<i64>;

    async fn commit_checksum(&self, page_id: i64, checksum: &str) -> Result<()>;

    async fn sections(&self, page_id: i64) -> Result<Vec<StoredSection>>;

    async fn list_pages(&self) -> Result<Vec<StoredPage>>;

    /// Sections whose similarity to `query.embedding` exceeds the threshold,
    /// most similar first.
    async fn match_sections(&self, query: MatchQuery<'_>) -> Result<Vec<SectionMatch>>;
}

/// Open the store described by `target`.
pub async fn open(target: &StoreTarget, config: &Config) -> Result<Box<dyn PageStore>> {
    match target {
        StoreTarget::Sqlite { path } => {
            let store = SqliteStore::open(path).await?;
            Ok(Box::new(store))
        }
        StoreTarget::Postgrest { url, service_key } => {
            let store = PostgrestStore::new(url, service_key, &config.store)?;
            Ok(Box::new(store))
        }
    }
}

/// Shared ranking used by the backends that compute similarity locally.
pub(crate) fn rank_matches(mut matches: Vec<SectionMatch>, count: usize) -> Vec<SectionMatch> {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    matches.truncate(count);
    matches
}
