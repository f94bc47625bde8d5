//! Core data models used throughout docsearch.
//!
//! These types flow through the indexing pipeline: the walker produces
//! [`DocumentDescriptor`]s, the parser turns file contents into a
//! [`ParsedDocument`], and the store persists [`StoredPage`]s and
//! [`StoredSection`]s.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Literal values captured from a document's `meta` export.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One discovered source file and its place in the docs hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDescriptor {
    /// Root-relative path without extension, `/`-separated (e.g. `guides/intro`).
    pub path: String,
    /// Path of the hierarchy document this file lives under, if any.
    pub parent_path: Option<String>,
    /// Source label written onto the stored page (e.g. `guide`).
    pub source: String,
    /// Location of the file on disk.
    pub file_path: PathBuf,
}

/// Normalized, immutable view of one document's content.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    /// Base64 SHA-256 of the raw content, used only for change detection.
    pub checksum: String,
    pub meta: Option<Metadata>,
    pub sections: Vec<Section>,
}

/// Heading-delimited slice of a document; the unit of embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub content: String,
    pub heading: Option<String>,
    pub slug: Option<String>,
}

/// A page row as persisted in the store.
///
/// `checksum` is `None` while the page's sections are being rewritten, or
/// after a failed regeneration. It is never a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPage {
    pub id: i64,
    pub path: String,
    pub checksum: Option<String>,
    pub parent_page_id: Option<i64>,
    #[serde(default)]
    pub meta: Option<Metadata>,
    #[serde(rename = "type")]
    pub page_type: Option<String>,
    pub source: Option<String>,
}

/// Page fields written by an upsert. The checksum is always cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct PageUpsert {
    pub path: String,
    pub page_type: String,
    pub source: String,
    pub meta: Option<Metadata>,
    pub parent_page_id: Option<i64>,
}

/// A section row about to be inserted for a page.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSection {
    pub page_id: i64,
    pub slug: Option<String>,
    pub heading: Option<String>,
    pub content: String,
    pub token_count: i64,
    pub embedding: Vec<f32>,
}

/// A section row as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSection {
    pub id: i64,
    pub page_id: i64,
    pub slug: Option<String>,
    pub heading: Option<String>,
    pub content: String,
    pub token_count: i64,
    pub embedding: Vec<f32>,
}

/// A section returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionMatch {
    pub id: i64,
    pub page_id: i64,
    #[serde(default)]
    pub path: Option<String>,
    pub slug: Option<String>,
    pub heading: Option<String>,
    pub content: String,
    pub similarity: f32,
}
