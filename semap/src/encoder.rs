//! HTTP client for the external text-encoder service.

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use semap_core::constants::EMBEDDING_DIM;
use semap_core::TextEncoder;
use serde::Deserialize;

/// Talks to an encoder service that turns query text into an embedding
/// comparable to the stored image embeddings.
///
/// Protocol: `POST {url}` with `{"text": "..."}`, answered with
/// `{"embedding": [f32; 512]}`.
#[derive(Debug)]
pub struct RemoteTextEncoder {
	client: reqwest::Client,
	url: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
	embedding: Vec<f32>,
}

impl RemoteTextEncoder {
	pub fn new(url: impl Into<String>) -> RemoteTextEncoder {
		RemoteTextEncoder {
			client: reqwest::Client::new(),
			url: url.into(),
		}
	}
}

#[async_trait]
impl TextEncoder for RemoteTextEncoder {
	async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
		let response = self
			.client
			.post(&self.url)
			.json(&serde_json::json!({ "text": text }))
			.send()
			.await
			.with_context(|| format!("requesting text embedding from {}", self.url))?
			.error_for_status()
			.with_context(|| format!("text encoder at {}", self.url))?;
		let parsed: EmbedResponse = response
			.json()
			.await
			.with_context(|| format!("parsing text-encoder response from {}", self.url))?;
		ensure!(
			parsed.embedding.len() == EMBEDDING_DIM,
			"text encoder returned {} dimensions, expected {EMBEDDING_DIM}",
			parsed.embedding.len()
		);
		Ok(parsed.embedding)
	}
}
