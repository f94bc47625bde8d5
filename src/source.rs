//! Document sources: things the sync engine can load and normalize.
//!
//! The sync engine only sees [`EmbeddingSource`]; Markdown/MDX files are
//! the one kind implemented today via [`MarkdownSource`].

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::mdx;
use crate::models::{DocumentDescriptor, ParsedDocument};

/// A discovered document that can be loaded into a [`ParsedDocument`].
#[async_trait]
pub trait EmbeddingSource: Send + Sync {
    fn descriptor(&self) -> &DocumentDescriptor;

    /// Value stored in the page's `type` column.
    fn page_type(&self) -> &str;

    async fn load(&self) -> Result<ParsedDocument>;
}

/// A `.md` / `.mdx` file on disk.
#[derive(Debug, Clone)]
pub struct MarkdownSource {
    descriptor: DocumentDescriptor,
}

impl MarkdownSource {
    pub fn new(descriptor: DocumentDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl EmbeddingSource for MarkdownSource {
    fn descriptor(&self) -> &DocumentDescriptor {
        &self.descriptor
    }

    fn page_type(&self) -> &str {
        "markdown"
    }

    async fn load(&self) -> Result<ParsedDocument> {
        let content = tokio::fs::read_to_string(&self.descriptor.file_path)
            .await
            .with_context(|| format!("Failed to read {}", self.descriptor.file_path.display()))?;
        Ok(mdx::process_mdx(&content))
    }
}

/// Wrap discovered descriptors as Markdown sources.
pub fn markdown_sources(descriptors: Vec<DocumentDescriptor>) -> Vec<Box<dyn EmbeddingSource>> {
    descriptors
        .into_iter()
        .map(|d| Box::new(MarkdownSource::new(d)) as Box<dyn EmbeddingSource>)
        .collect()
}
