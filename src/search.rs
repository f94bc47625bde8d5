//! Streaming semantic query over indexed sections.
//!
//! [`stream_query`] embeds the query with the same model used for indexing,
//! asks the store for the most similar sections and yields them one by one
//! as [`QueryEvent::Fragment`]s, terminated by [`QueryEvent::Done`]. Any
//! failure produces a single [`QueryEvent::Error`] and ends the stream.
//! Transport (SSE, websockets, …) is left to the consumer; [`QueryEvent::data`]
//! renders each event as the payload such a transport would send.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::{Config, SearchConfig};
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::models::SectionMatch;
use crate::store::{self, MatchQuery, PageStore};

/// End-of-stream marker sent after the last fragment.
pub const DONE_SENTINEL: &str = "[DONE]";

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    Fragment(SectionMatch),
    Done,
    Error(String),
}

impl QueryEvent {
    /// Wire payload: the match as JSON, the `[DONE]` sentinel, or
    /// `{"error": …}`.
    pub fn data(&self) -> String {
        match self {
            QueryEvent::Fragment(m) => {
                serde_json::to_string(m).unwrap_or_else(|_| json!({ "id": m.id }).to_string())
            }
            QueryEvent::Done => DONE_SENTINEL.to_string(),
            QueryEvent::Error(message) => json!({ "error": message }).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub threshold: f32,
    pub count: usize,
    pub min_content_length: usize,
}

impl From<&SearchConfig> for MatchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            threshold: config.match_threshold,
            count: config.match_count,
            min_content_length: config.min_content_length,
        }
    }
}

/// Run a query in the background and return the stream of its events.
pub fn stream_query(
    store: Arc<dyn PageStore>,
    embedder: Arc<dyn Embedder>,
    query: String,
    options: MatchOptions,
) -> mpsc::Receiver<QueryEvent> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        match produce(store.as_ref(), embedder.as_ref(), &query, options, &tx).await {
            Ok(()) => {
                let _ = tx.send(QueryEvent::Done).await;
            }
            Err(err) => {
                tracing::warn!(error = %format!("{:#}", err), "query failed");
                let _ = tx.send(QueryEvent::Error(format!("{:#}", err))).await;
            }
        }
    });

    rx
}

async fn produce(
    store: &dyn PageStore,
    embedder: &dyn Embedder,
    query: &str,
    options: MatchOptions,
    tx: &mpsc::Sender<QueryEvent>,
) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        bail!("missing query text");
    }

    let embedding = embedder.embed(query).await?;
    let matches = store
        .match_sections(MatchQuery {
            embedding: &embedding.vector,
            threshold: options.threshold,
            count: options.count,
            min_content_length: options.min_content_length,
        })
        .await?;

    for m in matches {
        if tx.send(QueryEvent::Fragment(m)).await.is_err() {
            // Receiver went away; nothing left to do.
            break;
        }
    }
    Ok(())
}

/// `docsearch search "<query>"`: print matching sections as they stream in.
pub async fn run_search(config: &Config, query: &str) -> Result<()> {
    let credentials = config.credentials()?;
    let store: Arc<dyn PageStore> = Arc::from(store::open(&credentials.store, config).await?);
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::new(
        &config.embedding,
        &credentials.embedding_key,
    )?);

    let mut events = stream_query(
        store,
        embedder,
        query.to_string(),
        MatchOptions::from(&config.search),
    );

    let mut shown = 0usize;
    while let Some(event) = events.recv().await {
        match event {
            QueryEvent::Fragment(m) => {
                shown += 1;
                let location = match (&m.path, &m.slug) {
                    (Some(path), Some(slug)) => format!("{}#{}", path, slug),
                    (Some(path), None) => path.clone(),
                    (None, _) => format!("page {}", m.page_id),
                };
                println!("{}. [{:.2}] {}", shown, m.similarity, location);
                if let Some(heading) = &m.heading {
                    println!("    heading: {}", heading);
                }
                println!("    excerpt: \"{}\"", excerpt(&m.content));
                println!();
            }
            QueryEvent::Done => break,
            QueryEvent::Error(message) => bail!("search failed: {}", message),
        }
    }

    if shown == 0 {
        println!("No results.");
    }
    Ok(())
}

fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    let mut out: String = flat.chars().take(200).collect();
    if flat.chars().count() > 200 {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbedError, Embedding};
    use crate::models::{NewSection, PageUpsert};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    struct FixedEmbedder {
        vector: Vec<f32>,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, _text: &str) -> Result<Embedding, EmbedError> {
            if self.fail {
                return Err(EmbedError::InvalidResponse("no vector".to_string()));
            }
            Ok(Embedding {
                vector: self.vector.clone(),
                token_count: 1,
            })
        }
    }

    fn options() -> MatchOptions {
        MatchOptions {
            threshold: 0.5,
            count: 10,
            min_content_length: 0,
        }
    }

    async fn indexed_store() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        let page = store
            .upsert_page(&PageUpsert {
                path: "guides/intro".to_string(),
                page_type: "markdown".to_string(),
                source: "guide".to_string(),
                meta: None,
                parent_page_id: None,
            })
            .await
            .unwrap();
        for (content, embedding) in [
            ("install the cli", vec![1.0, 0.0]),
            ("configure the store", vec![0.8, 0.2]),
            ("unrelated", vec![0.0, 1.0]),
        ] {
            store
                .insert_section(&NewSection {
                    page_id: page.id,
                    slug: Some(content.replace(' ', "-")),
                    heading: None,
                    content: content.to_string(),
                    token_count: 2,
                    embedding,
                })
                .await
                .unwrap();
        }
        store.commit_checksum(page.id, "sum").await.unwrap();
        Arc::new(store)
    }

    async fn collect(mut rx: mpsc::Receiver<QueryEvent>) -> Vec<QueryEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_fragments_then_done() {
        let store = indexed_store().await;
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
            fail: false,
        });

        let events = collect(stream_query(
            store,
            embedder,
            "how do I install?".to_string(),
            options(),
        ))
        .await;

        assert_eq!(events.len(), 3);
        match (&events[0], &events[1]) {
            (QueryEvent::Fragment(first), QueryEvent::Fragment(second)) => {
                assert_eq!(first.content, "install the cli");
                assert_eq!(second.content, "configure the store");
                assert_eq!(first.path.as_deref(), Some("guides/intro"));
            }
            other => panic!("expected two fragments, got {other:?}"),
        }
        assert_eq!(events[2], QueryEvent::Done);
        assert_eq!(events[2].data(), "[DONE]");
    }

    #[tokio::test]
    async fn test_empty_query_is_error_event() {
        let store = indexed_store().await;
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
            fail: false,
        });

        let events = collect(stream_query(store, embedder, "  \n ".to_string(), options())).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            QueryEvent::Error(message) => assert!(message.contains("missing query")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_is_error_event() {
        let store = indexed_store().await;
        let embedder = Arc::new(FixedEmbedder {
            vector: Vec::new(),
            fail: true,
        });

        let events = collect(stream_query(store, embedder, "q".to_string(), options())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], QueryEvent::Error(_)));
        assert!(events[0].data().contains("\"error\""));
    }

    #[tokio::test]
    async fn test_no_matches_is_just_done() {
        let store = indexed_store().await;
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![-1.0, 0.0],
            fail: false,
        });

        let events = collect(stream_query(store, embedder, "q".to_string(), options())).await;
        assert_eq!(events, vec![QueryEvent::Done]);
    }

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\nb\n"), "a b");
        let long = "x".repeat(250);
        assert_eq!(excerpt(&long).chars().count(), 201);
    }
}
