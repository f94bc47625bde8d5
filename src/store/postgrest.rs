//! [`PageStore`] backed by a PostgREST endpoint (e.g. a hosted Postgres
//! with the `vector` extension).
//!
//! Every request carries the service key both as `apikey` and as a bearer
//! token. Tables are addressed as `{url}/rest/v1/{table}`; similarity
//! search calls the `match_page_sections` database function through
//! `{url}/rest/v1/rpc/match_page_sections`.
//!
//! The schema is provisioned out of band; `docsearch init` does not touch
//! remote databases.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::config::StoreConfig;
use crate::models::{NewSection, PageUpsert, SectionMatch, StoredPage, StoredSection};

use super::{rank_matches, MatchQuery, PageStore};

const PAGE_SELECT: &str = "id,path,checksum,parent_page_id,meta,type,source";
const SECTION_SELECT: &str = "id,page_id,slug,heading,content,token_count,embedding";
const MATCH_FUNCTION: &str = "match_page_sections";

pub struct PostgrestStore {
    client: reqwest::Client,
    rest_url: String,
    page_table: String,
    section_table: String,
}

impl PostgrestStore {
    pub fn new(url: &str, service_key: &str, config: &StoreConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(service_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", service_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            page_table: config.page_table.clone(),
            section_table: config.section_table.clone(),
        })
    }

    fn table(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    async fn send<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T> {
        let response = checked(what, request).await?;
        response
            .json()
            .await
            .with_context(|| format!("{}: invalid response body", what))
    }

    async fn send_empty(&self, what: &str, request: RequestBuilder) -> Result<()> {
        checked(what, request).await?;
        Ok(())
    }
}

async fn checked(what: &str, request: RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .with_context(|| format!("{}: request failed", what))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("{}: store returned {}: {}", what, status.as_u16(), body);
    }
    Ok(response)
}

fn first<T>(what: &str, rows: Vec<T>) -> Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| anyhow!("{}: store returned no rows", what))
}

/// Section row as PostgREST serializes it. A `vector` column arrives as the
/// string `"[0.1,0.2]"`; a `real[]` column arrives as a JSON array.
#[derive(Deserialize)]
struct SectionRow {
    id: i64,
    page_id: i64,
    slug: Option<String>,
    heading: Option<String>,
    content: String,
    token_count: i64,
    #[serde(deserialize_with = "deserialize_vector")]
    embedding: Vec<f32>,
}

impl From<SectionRow> for StoredSection {
    fn from(row: SectionRow) -> Self {
        StoredSection {
            id: row.id,
            page_id: row.page_id,
            slug: row.slug,
            heading: row.heading,
            content: row.content,
            token_count: row.token_count,
            embedding: row.embedding,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VectorRepr {
    Array(Vec<f32>),
    Text(String),
}

fn deserialize_vector<'de, D>(deserializer: D) -> std::result::Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    match VectorRepr::deserialize(deserializer)? {
        VectorRepr::Array(values) => Ok(values),
        VectorRepr::Text(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
struct IdRow {
    id: i64,
}

#[async_trait]
impl PageStore for PostgrestStore {
    async fn find_page(&self, path: &str) -> Result<Option<StoredPage>> {
        let rows: Vec<StoredPage> = self
            .send(
                "find page",
                self.client.get(self.table(&self.page_table)).query(&[
                    ("select", PAGE_SELECT.to_string()),
                    ("path", format!("eq.{}", path)),
                ]),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_page(&self, page: &PageUpsert) -> Result<StoredPage> {
        let body = json!([{
            "path": page.path,
            "checksum": null,
            "parent_page_id": page.parent_page_id,
            "meta": page.meta,
            "type": page.page_type,
            "source": page.source,
        }]);
        let rows: Vec<StoredPage> = self
            .send(
                "upsert page",
                self.client
                    .post(self.table(&self.page_table))
                    .query(&[("on_conflict", "path"), ("select", PAGE_SELECT)])
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(&body),
            )
            .await?;
        first("upsert page", rows)
    }

    async fn set_parent(&self, page_id: i64, parent_page_id: Option<i64>) -> Result<()> {
        self.send_empty(
            "set parent",
            self.client
                .patch(self.table(&self.page_table))
                .query(&[("id", format!("eq.{}", page_id))])
                .json(&json!({ "parent_page_id": parent_page_id })),
        )
        .await
    }

    async fn delete_sections(&self, page_id: i64) -> Result<()> {
        self.send_empty(
            "delete sections",
            self.client
                .delete(self.table(&self.section_table))
                .query(&[("page_id", format!("eq.{}", page_id))]),
        )
        .await
    }

    async fn insert_section(&self, section: &NewSection) -> Result<i64> {
        let body = json!({
            "page_id": section.page_id,
            "slug": section.slug,
            "heading": section.heading,
            "content": section.content,
            "token_count": section.token_count,
            "embedding": section.embedding,
        });
        let rows: Vec<IdRow> = self
            .send(
                "insert section",
                self.client
                    .post(self.table(&self.section_table))
                    .query(&[("select", "id")])
                    .header("Prefer", "return=representation")
                    .json(&body),
            )
            .await?;
        Ok(first("insert section", rows)?.id)
    }

    async fn commit_checksum(&self, page_id: i64, checksum: &str) -> Result<()> {
        self.send_empty(
            "commit checksum",
            self.client
                .patch(self.table(&self.page_table))
                .query(&[("id", format!("eq.{}", page_id))])
                .json(&json!({ "checksum": checksum })),
        )
        .await
    }

    async fn sections(&self, page_id: i64) -> Result<Vec<StoredSection>> {
        let rows: Vec<SectionRow> = self
            .send(
                "list sections",
                self.client.get(self.table(&self.section_table)).query(&[
                    ("select", SECTION_SELECT.to_string()),
                    ("page_id", format!("eq.{}", page_id)),
                    ("order", "id.asc".to_string()),
                ]),
            )
            .await?;
        Ok(rows.into_iter().map(StoredSection::from).collect())
    }

    async fn list_pages(&self) -> Result<Vec<StoredPage>> {
        self.send(
            "list pages",
            self.client
                .get(self.table(&self.page_table))
                .query(&[("select", PAGE_SELECT), ("order", "path.asc")]),
        )
        .await
    }

    async fn match_sections(&self, query: MatchQuery<'_>) -> Result<Vec<SectionMatch>> {
        let body = json!({
            "embedding": query.embedding,
            "match_threshold": query.threshold,
            "match_count": query.count,
            "min_content_length": query.min_content_length,
        });
        let matches: Vec<SectionMatch> = self
            .send(
                "match sections",
                self.client
                    .post(format!("{}/rpc/{}", self.rest_url, MATCH_FUNCTION))
                    .json(&body),
            )
            .await?;
        Ok(rank_matches(matches, query.count))
    }
}
