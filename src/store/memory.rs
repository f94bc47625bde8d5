//! In-memory [`PageStore`] implementation for tests.
//!
//! Pages and sections live in `Vec`s behind a single `std::sync::RwLock`.
//! Similarity search is brute-force cosine similarity over all sections
//! of completely indexed pages.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{NewSection, PageUpsert, SectionMatch, StoredPage, StoredSection};

use super::{rank_matches, MatchQuery, PageStore};

#[derive(Default)]
struct State {
    pages: Vec<StoredPage>,
    sections: Vec<StoredSection>,
    next_page_id: i64,
    next_section_id: i64,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl State {
    fn page_mut(&mut self, page_id: i64) -> Result<&mut StoredPage> {
        match self.pages.iter_mut().find(|p| p.id == page_id) {
            Some(page) => Ok(page),
            None => bail!("page {} does not exist", page_id),
        }
    }
}

#[async_trait]
impl PageStore for InMemoryStore {
    async fn find_page(&self, path: &str) -> Result<Option<StoredPage>> {
        let state = self.read()?;
        Ok(state.pages.iter().find(|p| p.path == path).cloned())
    }

    async fn upsert_page(&self, page: &PageUpsert) -> Result<StoredPage> {
        let mut state = self.write()?;
        if let Some(existing) = state.pages.iter_mut().find(|p| p.path == page.path) {
            existing.checksum = None;
            existing.parent_page_id = page.parent_page_id;
            existing.meta = page.meta.clone();
            existing.page_type = Some(page.page_type.clone());
            existing.source = Some(page.source.clone());
            return Ok(existing.clone());
        }

        state.next_page_id += 1;
        let stored = StoredPage {
            id: state.next_page_id,
            path: page.path.clone(),
            checksum: None,
            parent_page_id: page.parent_page_id,
            meta: page.meta.clone(),
            page_type: Some(page.page_type.clone()),
            source: Some(page.source.clone()),
        };
        state.pages.push(stored.clone());
        Ok(stored)
    }

    async fn set_parent(&self, page_id: i64, parent_page_id: Option<i64>) -> Result<()> {
        let mut state = self.write()?;
        state.page_mut(page_id)?.parent_page_id = parent_page_id;
        Ok(())
    }

    async fn delete_sections(&self, page_id: i64) -> Result<()> {
        let mut state = self.write()?;
        state.sections.retain(|s| s.page_id != page_id);
        Ok(())
    }

    async fn insert_section(&self, section: &NewSection) -> Result<i64> {
        let mut state = self.write()?;
        if !state.pages.iter().any(|p| p.id == section.page_id) {
            bail!("page {} does not exist", section.page_id);
        }
        state.next_section_id += 1;
        let id = state.next_section_id;
        state.sections.push(StoredSection {
            id,
            page_id: section.page_id,
            slug: section.slug.clone(),
            heading: section.heading.clone(),
            content: section.content.clone(),
            token_count: section.token_count,
            embedding: section.embedding.clone(),
        });
        Ok(id)
    }

    async fn commit_checksum(&self, page_id: i64, checksum: &str) -> Result<()> {
        let mut state = self.write()?;
        state.page_mut(page_id)?.checksum = Some(checksum.to_string());
        Ok(())
    }

    async fn sections(&self, page_id: i64) -> Result<Vec<StoredSection>> {
        let state = self.read()?;
        Ok(state
            .sections
            .iter()
            .filter(|s| s.page_id == page_id)
            .cloned()
            .collect())
    }

    async fn list_pages(&self) -> Result<Vec<StoredPage>> {
        let state = self.read()?;
        let mut pages = state.pages.clone();
        pages.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(pages)
    }

    async fn match_sections(&self, query: MatchQuery<'_>) -> Result<Vec<SectionMatch>> {
        let state = self.read()?;
        let matches = state
            .sections
            .iter()
            .filter(|s| s.content.chars().count() >= query.min_content_length)
            .filter_map(|s| {
                let page = state
                    .pages
                    .iter()
                    .find(|p| p.id == s.page_id && p.checksum.is_some())?;
                let similarity = cosine_similarity(query.embedding, &s.embedding);
                (similarity > query.threshold).then(|| SectionMatch {
                    id: s.id,
                    page_id: s.page_id,
                    path: Some(page.path.clone()),
                    slug: s.slug.clone(),
                    heading: s.heading.clone(),
                    content: s.content.clone(),
                    similarity,
                })
            })
            .collect();
        Ok(rank_matches(matches, query.count))
    }
}
