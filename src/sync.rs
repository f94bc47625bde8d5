//! Incremental sync of discovered documents into the page store.
//!
//! Each document is processed to completion before the next one starts:
//!
//! 1. Load and parse the source.
//! 2. Look up the stored page by path. If its checksum equals the fresh
//!    checksum the page is unchanged and only its parent link is corrected.
//! 3. Otherwise the old sections are deleted, the parent is resolved and the
//!    page is upserted with a `NULL` checksum.
//! 4. Every section is embedded and inserted, in order.
//! 5. The real checksum is written last.
//!
//! A page with a non-null checksum therefore always has a complete set of
//! sections. Any error is caught at the document boundary, recorded in the
//! [`SyncReport`] and the run moves on; the page keeps its `NULL` checksum
//! and is regenerated in full on the next run.

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::models::{NewSection, PageUpsert};
use crate::source::{markdown_sources, EmbeddingSource};
use crate::store::{self, PageStore};
use crate::walker;

/// Characters of a failing section's input included in the error log.
const ERROR_PREVIEW_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Classify documents against the store without embedding or writing.
    pub dry_run: bool,
}

/// What happened to one document during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Unchanged,
    /// Unchanged content, parent link corrected.
    Relinked,
    Created,
    Regenerated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub discovered: usize,
    pub unchanged: usize,
    pub relinked: usize,
    pub created: usize,
    pub regenerated: usize,
    pub failed: Vec<SyncFailure>,
    pub sections_written: usize,
    pub tokens_used: i64,
}

impl SyncReport {
    fn record(&mut self, outcome: DocumentOutcome) {
        match outcome {
            DocumentOutcome::Unchanged => self.unchanged += 1,
            DocumentOutcome::Relinked => self.relinked += 1,
            DocumentOutcome::Created => self.created += 1,
            DocumentOutcome::Regenerated => self.regenerated += 1,
        }
    }
}

/// Sync every source into `store`, strictly one document at a time.
pub async fn sync_sources(
    store: &dyn PageStore,
    embedder: &dyn Embedder,
    sources: &[Box<dyn EmbeddingSource>],
    options: SyncOptions,
) -> SyncReport {
    let mut report = SyncReport {
        discovered: sources.len(),
        ..SyncReport::default()
    };

    for source in sources {
        let path = source.descriptor().path.clone();
        match sync_document(store, embedder, source.as_ref(), options, &mut report).await {
            Ok(outcome) => report.record(outcome),
            Err(err) => {
                let message = format!("{:#}", err);
                error!(
                    path = %path,
                    error = %message,
                    "page sync failed; page left with null checksum and will be regenerated on the next run"
                );
                report.failed.push(SyncFailure {
                    path,
                    error: message,
                });
            }
        }
    }

    report
}

async fn sync_document(
    store: &dyn PageStore,
    embedder: &dyn Embedder,
    source: &dyn EmbeddingSource,
    options: SyncOptions,
    report: &mut SyncReport,
) -> Result<DocumentOutcome> {
    let descriptor = source.descriptor();
    let path = descriptor.path.as_str();

    let parsed = source.load().await?;
    let existing = store.find_page(path).await?;

    if let Some(page) = &existing {
        if page.checksum.as_deref() == Some(parsed.checksum.as_str()) {
            let parent_id = resolve_parent(store, descriptor.parent_path.as_deref()).await?;
            if page.parent_page_id == parent_id {
                return Ok(DocumentOutcome::Unchanged);
            }
            info!(path = %path, parent = ?descriptor.parent_path, "parent page changed, updating link");
            if !options.dry_run {
                store.set_parent(page.id, parent_id).await?;
            }
            return Ok(DocumentOutcome::Relinked);
        }
    }

    let outcome = if existing.is_some() {
        DocumentOutcome::Regenerated
    } else {
        DocumentOutcome::Created
    };
    if options.dry_run {
        return Ok(outcome);
    }

    if let Some(page) = &existing {
        info!(path = %path, "content changed, removing old page sections");
        store.delete_sections(page.id).await?;
    }

    let parent_page_id = resolve_parent(store, descriptor.parent_path.as_deref()).await?;
    let page = store
        .upsert_page(&PageUpsert {
            path: descriptor.path.clone(),
            page_type: source.page_type().to_string(),
            source: descriptor.source.clone(),
            meta: parsed.meta.clone(),
            parent_page_id,
        })
        .await
        .context("failed to upsert page")?;

    info!(path = %path, sections = parsed.sections.len(), "adding page sections");

    for section in &parsed.sections {
        let embedding = match embedder.embed(&section.content).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(
                    path = %path,
                    input = %preview(&section.content),
                    error = %err,
                    "failed to generate embeddings for page section"
                );
                return Err(err).context("failed to generate embeddings");
            }
        };

        store
            .insert_section(&NewSection {
                page_id: page.id,
                slug: section.slug.clone(),
                heading: section.heading.clone(),
                content: section.content.clone(),
                token_count: embedding.token_count,
                embedding: embedding.vector,
            })
            .await
            .context("failed to insert page section")?;

        report.sections_written += 1;
        report.tokens_used += embedding.token_count;
    }

    store
        .commit_checksum(page.id, &parsed.checksum)
        .await
        .context("failed to update page checksum")?;

    Ok(outcome)
}

/// Id of the stored page at `parent_path`. A parent that has not been
/// indexed resolves to `None`; a later run re-links it.
async fn resolve_parent(store: &dyn PageStore, parent_path: Option<&str>) -> Result<Option<i64>> {
    let parent_path = match parent_path {
        Some(p) => p,
        None => return Ok(None),
    };
    let parent = store
        .find_page(parent_path)
        .await
        .with_context(|| format!("failed to look up parent page '{}'", parent_path))?;
    Ok(parent.map(|p| p.id))
}

fn preview(text: &str) -> String {
    text.chars().take(ERROR_PREVIEW_CHARS).collect()
}

/// `docsearch sync`: discover, parse, embed and store every document.
pub async fn run_sync(config: &Config, dry_run: bool) -> Result<()> {
    let credentials = match config.credentials() {
        Ok(credentials) => credentials,
        Err(err) => {
            eprintln!("sync skipped: {}", err);
            return Ok(());
        }
    };

    let descriptors = walker::discover(config)?;
    info!(count = descriptors.len(), root = %config.source.root.display(), "discovered documents");
    let sources = markdown_sources(descriptors);

    let store = store::open(&credentials.store, config).await?;
    let embedder = OpenAIEmbedder::new(&config.embedding, &credentials.embedding_key)?;

    let report = sync_sources(
        store.as_ref(),
        &embedder,
        &sources,
        SyncOptions { dry_run },
    )
    .await;

    if dry_run {
        println!("sync {} (dry-run)", config.source.label);
    } else {
        println!("sync {}", config.source.label);
    }
    println!("  discovered: {}", report.discovered);
    println!("  unchanged: {}", report.unchanged);
    println!("  relinked: {}", report.relinked);
    println!("  created: {}", report.created);
    println!("  regenerated: {}", report.regenerated);
    println!("  failed: {}", report.failed.len());
    for failure in &report.failed {
        println!("    {}: {}", failure.path, failure.error);
    }
    if !dry_run {
        println!("  sections written: {}", report.sections_written);
        println!("  tokens used: {}", report.tokens_used);
        println!("  embedding model: {}", embedder.model_name());
    }
    println!("ok");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbedError, Embedding};
    use crate::mdx;
    use crate::models::{DocumentDescriptor, ParsedDocument, StoredPage, StoredSection};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Embeds by text length; fails for inputs containing the `fail_on` marker.
    #[derive(Default)]
    struct FakeEmbedder {
        calls: AtomicUsize,
        fail_on: Mutex<Option<String>>,
    }

    impl FakeEmbedder {
        fn failing_on(marker: &str) -> Self {
            let embedder = Self::default();
            *embedder.fail_on.lock().unwrap() = Some(marker.to_string());
            embedder
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_on.lock().unwrap().as_deref() {
                if text.contains(marker) {
                    return Err(EmbedError::Status {
                        status: 500,
                        body: "boom".to_string(),
                    });
                }
            }
            Ok(Embedding {
                vector: vec![text.len() as f32, 1.0],
                token_count: text.split_whitespace().count() as i64,
            })
        }
    }

    struct StaticSource {
        descriptor: DocumentDescriptor,
        content: String,
    }

    #[async_trait]
    impl EmbeddingSource for StaticSource {
        fn descriptor(&self) -> &DocumentDescriptor {
            &self.descriptor
        }

        fn page_type(&self) -> &str {
            "markdown"
        }

        async fn load(&self) -> Result<ParsedDocument> {
            Ok(mdx::process_mdx(&self.content))
        }
    }

    fn doc(path: &str, parent: Option<&str>, content: &str) -> Box<dyn EmbeddingSource> {
        Box::new(StaticSource {
            descriptor: DocumentDescriptor {
                path: path.to_string(),
                parent_path: parent.map(str::to_string),
                source: "guide".to_string(),
                file_path: PathBuf::from(format!("{}.mdx", path)),
            },
            content: content.to_string(),
        })
    }

    async fn run(
        store: &InMemoryStore,
        embedder: &FakeEmbedder,
        sources: &[Box<dyn EmbeddingSource>],
    ) -> SyncReport {
        sync_sources(store, embedder, sources, SyncOptions::default()).await
    }

    async fn snapshot(store: &InMemoryStore) -> Vec<(StoredPage, Vec<StoredSection>)> {
        let mut out = Vec::new();
        for page in store.list_pages().await.unwrap() {
            let sections = store.sections(page.id).await.unwrap();
            out.push((page, sections));
        }
        out
    }

    async fn page(store: &InMemoryStore, path: &str) -> StoredPage {
        store.find_page(path).await.unwrap().unwrap()
    }

    const GUIDE: &str = "# Guides\nStart here.\n";
    const INTRO: &str = "# A\ntext1\n## B\ntext2\n";

    #[tokio::test]
    async fn test_first_run_creates_pages_and_sections() {
        let store = InMemoryStore::new();
        let embedder = FakeEmbedder::default();
        let sources = vec![
            doc("guides", None, GUIDE),
            doc("guides/intro", Some("guides"), INTRO),
        ];

        let report = run(&store, &embedder, &sources).await;
        assert_eq!(report.discovered, 2);
        assert_eq!(report.created, 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.sections_written, 3);
        assert_eq!(embedder.calls(), 3);
        assert!(report.tokens_used > 0);

        let guides = page(&store, "guides").await;
        let intro = page(&store, "guides/intro").await;
        assert_eq!(intro.parent_page_id, Some(guides.id));
        assert_eq!(intro.checksum, Some(mdx::checksum(INTRO)));
        assert_eq!(intro.page_type.as_deref(), Some("markdown"));
        assert_eq!(intro.source.as_deref(), Some("guide"));

        let sections = store.sections(intro.id).await.unwrap();
        let headings: Vec<_> = sections.iter().map(|s| s.heading.as_deref()).collect();
        assert_eq!(headings, vec![Some("A"), Some("B")]);
        assert!(sections[0].content.contains("text1"));
        assert!(sections[1].content.contains("text2"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent_and_makes_no_embedding_calls() {
        let store = InMemoryStore::new();
        let embedder = FakeEmbedder::default();
        let sources = vec![
            doc("guides", None, GUIDE),
            doc("guides/intro", Some("guides"), INTRO),
        ];

        run(&store, &embedder, &sources).await;
        let before = snapshot(&store).await;
        let calls = embedder.calls();

        let report = run(&store, &embedder, &sources).await;
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.created + report.regenerated + report.relinked, 0);
        assert_eq!(report.sections_written, 0);
        assert_eq!(embedder.calls(), calls);
        assert_eq!(snapshot(&store).await, before);
    }

    #[tokio::test]
    async fn test_changed_document_replaces_all_sections() {
        let store = InMemoryStore::new();
        let embedder = FakeEmbedder::default();
        run(&store, &embedder, &[doc("intro", None, INTRO)]).await;
        let old_ids: Vec<i64> = store
            .sections(page(&store, "intro").await.id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();

        let updated = "# Only\nOne section now.\n";
        let report = run(&store, &embedder, &[doc("intro", None, updated)]).await;
        assert_eq!(report.regenerated, 1);

        let intro = page(&store, "intro").await;
        assert_eq!(intro.checksum, Some(mdx::checksum(updated)));
        let sections = store.sections(intro.id).await.unwrap();
        let expected = mdx::process_mdx(updated).sections;
        assert_eq!(sections.len(), expected.len());
        assert_eq!(sections[0].content, expected[0].content);
        assert_eq!(sections[0].slug.as_deref(), Some("only"));
        assert!(sections.iter().all(|s| !old_ids.contains(&s.id)));
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_null_checksum_then_retries() {
        let store = InMemoryStore::new();
        let ok = FakeEmbedder::default();
        run(&store, &ok, &[doc("intro", None, INTRO)]).await;

        let changed = "# One\nfine\n## Two\nFAIL here\n## Three\nnever reached\n";
        let failing = FakeEmbedder::failing_on("FAIL");
        let report = run(&store, &failing, &[doc("intro", None, changed)]).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "intro");
        assert!(report.failed[0].error.contains("500"));
        assert_eq!(failing.calls(), 2);

        let intro = page(&store, "intro").await;
        assert_eq!(intro.checksum, None);
        assert_eq!(store.sections(intro.id).await.unwrap().len(), 1);

        // Same content, healthy service: the null checksum forces a full regeneration.
        let report = run(&store, &ok, &[doc("intro", None, changed)]).await;
        assert_eq!(report.regenerated, 1);
        let intro = page(&store, "intro").await;
        assert_eq!(intro.checksum, Some(mdx::checksum(changed)));
        let headings: Vec<_> = store
            .sections(intro.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.heading)
            .collect();
        assert_eq!(
            headings,
            vec![
                Some("One".to_string()),
                Some("Two".to_string()),
                Some("Three".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_documents() {
        let store = InMemoryStore::new();
        let embedder = FakeEmbedder::failing_on("FAIL");
        let sources = vec![
            doc("a", None, "# A\nFAIL\n"),
            doc("b", None, "# B\nfine\n"),
        ];

        let report = run(&store, &embedder, &sources).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.created, 1);
        assert_eq!(page(&store, "a").await.checksum, None);
        assert!(page(&store, "b").await.checksum.is_some());
    }

    #[tokio::test]
    async fn test_unchanged_document_is_relinked_to_late_parent() {
        let store = InMemoryStore::new();
        let embedder = FakeEmbedder::default();

        run(&store, &embedder, &[doc("guides/intro", Some("guides"), INTRO)]).await;
        assert_eq!(page(&store, "guides/intro").await.parent_page_id, None);
        let calls = embedder.calls();

        let report = run(
            &store,
            &embedder,
            &[
                doc("guides", None, GUIDE),
                doc("guides/intro", Some("guides"), INTRO),
            ],
        )
        .await;
        assert_eq!(report.created, 1);
        assert_eq!(report.relinked, 1);
        // Only the new parent's single section was embedded.
        assert_eq!(embedder.calls(), calls + 1);

        let guides = page(&store, "guides").await;
        assert_eq!(
            page(&store, "guides/intro").await.parent_page_id,
            Some(guides.id)
        );
    }

    #[tokio::test]
    async fn test_dry_run_classifies_without_writes() {
        let store = InMemoryStore::new();
        let embedder = FakeEmbedder::default();
        run(&store, &embedder, &[doc("a", None, "# A\none\n")]).await;
        let before = snapshot(&store).await;
        let calls = embedder.calls();

        let report = sync_sources(
            &store,
            &embedder,
            &[
                doc("a", None, "# A\nchanged\n"),
                doc("b", None, "# B\nnew\n"),
            ],
            SyncOptions { dry_run: true },
        )
        .await;

        assert_eq!(report.regenerated, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.sections_written, 0);
        assert_eq!(embedder.calls(), calls);
        assert_eq!(snapshot(&store).await, before);
    }

    #[tokio::test]
    async fn test_document_without_content_commits_empty_page() {
        let store = InMemoryStore::new();
        let embedder = FakeEmbedder::default();
        let content = "import { Callout } from './callout'\n\nexport const meta = { title: 'Empty' }\n";

        let report = run(&store, &embedder, &[doc("empty", None, content)]).await;
        assert_eq!(report.created, 1);
        assert_eq!(embedder.calls(), 0);

        let empty = page(&store, "empty").await;
        assert_eq!(empty.checksum, Some(mdx::checksum(content)));
        assert_eq!(empty.meta.unwrap()["title"], "Empty");
        assert!(store.sections(empty.id).await.unwrap().is_empty());
    }
}
