//! Interface to the external text encoder.
//!
//! The encoder that turns a query string into a 512-d embedding lives outside
//! this workspace (it is part of the embeddings pipeline). The serving path
//! only depends on this trait; tests plug in a table-backed stub.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

#[async_trait]
pub trait TextEncoder: Debug + Send + Sync {
	/// Encodes `text` into an embedding comparable to the stored image
	/// embeddings (same dimension, same metric).
	async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}
