//! Store construction from a database URI.

use crate::{DirectoryStore, MemoryStore, VectorStore};
use anyhow::Result;
use std::sync::Arc;

/// Opens a vector store from a database URI.
///
/// - `memory:` — a fresh in-memory store (tests, demos)
/// - anything else — a [`DirectoryStore`] rooted at that path
///
/// Remote engines plug in behind [`VectorStore`] without touching callers.
pub fn open_store(database: &str) -> Result<Arc<dyn VectorStore>> {
	if database == "memory:" || database == "memory" {
		return Ok(Arc::new(MemoryStore::new()));
	}
	Ok(Arc::new(DirectoryStore::open(database)?))
}
