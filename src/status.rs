//! Indexed page overview.
//!
//! `docsearch status` lists every stored page with its section count and
//! flags pages whose checksum is `NULL`: they were interrupted or failed
//! mid-regeneration and will be rebuilt in full by the next sync.

use anyhow::Result;

use crate::config::Config;
use crate::store::{self, PageStore};

/// One row of the status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStatus {
    pub path: String,
    pub sections: usize,
    pub pending: bool,
    pub parent_page_id: Option<i64>,
}

/// Collect the status of every stored page, ordered by path.
pub async fn page_statuses(store: &dyn PageStore) -> Result<Vec<PageStatus>> {
    let mut statuses = Vec::new();
    for page in store.list_pages().await? {
        let sections = store.sections(page.id).await?.len();
        statuses.push(PageStatus {
            path: page.path,
            sections,
            pending: page.checksum.is_none(),
            parent_page_id: page.parent_page_id,
        });
    }
    Ok(statuses)
}

pub async fn run_status(config: &Config) -> Result<()> {
    let target = config.store_target()?;
    let store = store::open(&target, config).await?;
    let statuses = page_statuses(store.as_ref()).await?;

    if statuses.is_empty() {
        println!("No pages indexed.");
        return Ok(());
    }

    let pending = statuses.iter().filter(|s| s.pending).count();
    let sections: usize = statuses.iter().map(|s| s.sections).sum();

    for status in &statuses {
        let marker = if status.pending { "pending" } else { "ok" };
        println!(
            "  {:<8} {} ({} sections)",
            marker, status.path, status.sections
        );
    }
    println!();
    println!("pages: {}", statuses.len());
    println!("sections: {}", sections);
    println!("pending: {}", pending);

    Ok(())
}
