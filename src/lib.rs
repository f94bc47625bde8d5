//! # docsearch
//!
//! Incremental indexer for a tree of Markdown/MDX documents. Every document
//! is split into heading-delimited sections, each section is embedded, and
//! the result is kept in sync with a page store that a semantic query path
//! reads from.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Walker   │──▶│   Parser   │──▶│ Sync Engine │──▶│  PageStore   │
//! │ docs tree  │   │  MDX → §   │   │ checksum ⇄  │   │ SQLite/REST  │
//! └────────────┘   └────────────┘   └──────┬──────┘   └──────┬───────┘
//!                                          │                 │
//!                                    ┌─────▼─────┐     ┌─────▼─────┐
//!                                    │ Embedder  │     │  Query    │
//!                                    │ (OpenAI)  │     │  stream   │
//!                                    └───────────┘     └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsearch init                     # create the SQLite schema
//! docsearch sync                     # index ./docs
//! docsearch status                   # pages and pending regenerations
//! docsearch search "how do I deploy?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`models`] | Core data types |
//! | [`walker`] | Source tree discovery and hierarchy inference |
//! | [`mdx`] | Checksums, node tree and section splitting |
//! | [`esm`] | ESM completeness and the `meta` export |
//! | [`slug`] | GitHub-style heading slugs |
//! | [`source`] | Loadable document sources |
//! | [`embedding`] | Embedding client abstraction |
//! | [`store`] | Page/section persistence backends |
//! | [`sync`] | Incremental sync engine |
//! | [`search`] | Streaming semantic query |
//! | [`status`] | Indexed page overview |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation |

pub mod config;
pub mod db;
pub mod embedding;
pub mod esm;
pub mod mdx;
pub mod migrate;
pub mod models;
pub mod search;
pub mod slug;
pub mod source;
pub mod status;
pub mod store;
pub mod sync;
pub mod walker;
