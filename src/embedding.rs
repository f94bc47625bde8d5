//! Embedding client abstraction and the OpenAI-compatible implementation.
//!
//! The [`Embedder`] trait embeds exactly one text per call and reports the
//! tokens the service charged for it. There is no caching, batching or
//! retrying here: a failed call is returned to the caller, and the sync
//! engine treats it as a failure of the whole document.
//!
//! Also provides the vector helpers shared by the stores:
//! - [`cosine_similarity`] - similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] - little-endian `f32` BLOB encoding

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Vector and token usage returned for one input.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub token_count: i64,
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// A service that turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-ada-002"`.
    fn model_name(&self) -> &str;

    /// Embed one text. Newlines are collapsed before the request is sent.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError>;
}

/// Replace every line break with a single space.
///
/// The embedding model produces better vectors without newlines.
pub fn prepare_input(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

// ============ OpenAI ============

/// Client for `POST {base_url}/embeddings`.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: Usage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: i64,
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        let input = prepare_input(text);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: &input,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::InvalidResponse("missing data[0]".to_string()))?;
        if vector.is_empty() {
            return Err(EmbedError::InvalidResponse("empty embedding".to_string()));
        }

        Ok(Embedding {
            vector,
            token_count: parsed.usage.total_tokens,
        })
    }
}

// ============ Vector helpers ============

/// Encode a vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn config_for(server: &mockito::Server) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: server.url(),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_prepare_input_collapses_newlines() {
        assert_eq!(prepare_input("a\nb\r\nc\rd"), "a b c d");
        assert_eq!(prepare_input("a\n\nb"), "a  b");
        assert_eq!(prepare_input("plain"), "plain");
    }

    #[tokio::test]
    async fn test_embed_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "text-embedding-ada-002",
                "input": "# Title Body text",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[{"embedding":[0.5,-0.25,1.0],"index":0}],"usage":{"prompt_tokens":4,"total_tokens":4}}"#,
            )
            .create_async()
            .await;

        let embedder = OpenAIEmbedder::new(&config_for(&server), "sk-test").unwrap();
        let result = embedder.embed("# Title\nBody text").await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.vector, vec![0.5, -0.25, 1.0]);
        assert_eq!(result.token_count, 4);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .with_status(500)
            .with_body("upstream exploded")
            .expect(1)
            .create_async()
            .await;

        let embedder = OpenAIEmbedder::new(&config_for(&server), "sk-test").unwrap();
        let err = embedder.embed("text").await.unwrap_err();

        mock.assert_async().await;
        match err {
            EmbedError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(r#"{"data":[],"usage":{"total_tokens":0}}"#)
            .create_async()
            .await;

        let embedder = OpenAIEmbedder::new(&config_for(&server), "sk-test").unwrap();
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbedError::InvalidResponse(_)));
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(OpenAIEmbedder::new(&EmbeddingConfig::default(), " ").is_err());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
