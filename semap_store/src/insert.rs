//! Chunked persistence with rollback.
//!
//! Inserts are strictly batched; each batch is flushed before the next one
//! goes out. If any batch fails, the target collection is dropped so the
//! store never exposes a partially written collection.

use crate::store::VectorStore;
use anyhow::{Context, Result};
use semap_core::Row;

/// Inserts `rows` into `collection` in batches of `batch_size`, flushing
/// after every batch. On any failure the collection is dropped before the
/// error is returned. Returns the number of inserted rows.
pub async fn insert_chunked(
	store: &dyn VectorStore,
	collection: &str,
	rows: Vec<Row>,
	batch_size: usize,
) -> Result<usize> {
	let total = rows.len();
	let batch_size = batch_size.max(1);
	let mut inserted = 0usize;
	let mut pending = rows;
	while !pending.is_empty() {
		let batch: Vec<Row> = pending.drain(..batch_size.min(pending.len())).collect();
		let batch_len = batch.len();
		let result = async {
			store.insert(collection, batch).await?;
			store.flush(collection).await
		}
		.await;
		if let Err(err) = result {
			log::error!("insert into '{collection}' failed after {inserted}/{total} rows, dropping it: {err}");
			if let Err(drop_err) = store.drop_collection(collection).await {
				log::error!("rollback of '{collection}' also failed: {drop_err}");
			}
			return Err(err).with_context(|| format!("inserting rows {inserted}..{} into '{collection}'", inserted + batch_len));
		}
		inserted += batch_len;
	}
	Ok(inserted)
}

/// Prepares `name` for a fresh population: drops it when `repopulate` is
/// set, keeps it otherwise. Returns whether the name is now absent.
pub async fn ensure_absent(store: &dyn VectorStore, name: &str, repopulate: bool) -> Result<bool> {
	if !store.has_collection(name).await? {
		return Ok(true);
	}
	if !repopulate {
		let entities = store.num_entities(name).await?;
		log::info!("found collection '{name}' with {entities} entities, keeping it (pass repopulate to drop)");
		return Ok(false);
	}
	let entities = store.num_entities(name).await?;
	log::info!("found collection '{name}' with {entities} entities, dropping it");
	store.drop_collection(name).await?;
	Ok(true)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryStore;
	use crate::store::SearchHit;
	use async_trait::async_trait;
	use semap_core::constants::{FIELD_INDEX, FIELD_ZOOM_PLUS_TILE};
	use semap_core::{image_to_tile_schema, CollectionSchema, Value};
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn rows(n: usize) -> Vec<Row> {
		(0..n)
			.map(|i| {
				Row::new()
					.with(FIELD_INDEX, Value::Int(i as i64))
					.with(FIELD_ZOOM_PLUS_TILE, Value::FloatVec(vec![0.0, 0.0, 0.0]))
			})
			.collect()
	}

	/// Store wrapper that fails the n-th insert call.
	#[derive(Debug)]
	struct FailingStore {
		inner: MemoryStore,
		fail_at: usize,
		calls: AtomicUsize,
	}

	#[async_trait]
	impl VectorStore for FailingStore {
		async fn list_collections(&self) -> Result<Vec<String>> {
			self.inner.list_collections().await
		}
		async fn has_collection(&self, name: &str) -> Result<bool> {
			self.inner.has_collection(name).await
		}
		async fn create_collection(&self, schema: CollectionSchema) -> Result<()> {
			self.inner.create_collection(schema).await
		}
		async fn drop_collection(&self, name: &str) -> Result<()> {
			self.inner.drop_collection(name).await
		}
		async fn schema(&self, name: &str) -> Result<CollectionSchema> {
			self.inner.schema(name).await
		}
		async fn num_entities(&self, name: &str) -> Result<i64> {
			self.inner.num_entities(name).await
		}
		async fn load_collection(&self, name: &str) -> Result<()> {
			self.inner.load_collection(name).await
		}
		async fn release_collection(&self, name: &str) -> Result<()> {
			self.inner.release_collection(name).await
		}
		async fn insert(&self, name: &str, rows: Vec<Row>) -> Result<()> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);
			anyhow::ensure!(call != self.fail_at, "injected insert failure at batch {call}");
			self.inner.insert(name, rows).await
		}
		async fn flush(&self, name: &str) -> Result<()> {
			self.inner.flush(name).await
		}
		async fn query(&self, name: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Row>> {
			self.inner.query(name, ids, fields).await
		}
		async fn search(&self, name: &str, field: &str, vector: &[f32], limit: usize, fields: &[&str])
			-> Result<Vec<SearchHit>> {
			self.inner.search(name, field, vector, limit, fields).await
		}
	}

	#[tokio::test]
	async fn inserts_in_batches() -> Result<()> {
		let store = MemoryStore::new();
		store.create_collection(image_to_tile_schema("art")).await?;
		let inserted = insert_chunked(&store, "art_image_to_tile", rows(23), 10).await?;
		assert_eq!(inserted, 23);
		assert_eq!(store.num_entities("art_image_to_tile").await?, 23);
		Ok(())
	}

	#[tokio::test]
	async fn failed_batch_drops_the_collection() -> Result<()> {
		let store = FailingStore {
			inner: MemoryStore::new(),
			fail_at: 2,
			calls: AtomicUsize::new(0),
		};
		store.create_collection(image_to_tile_schema("art")).await?;
		let err = insert_chunked(&store, "art_image_to_tile", rows(25), 10).await.unwrap_err();
		assert!(err.to_string().contains("art_image_to_tile"), "{err}");
		// The partially written collection must be gone.
		assert!(!store.has_collection("art_image_to_tile").await?);
		Ok(())
	}

	#[tokio::test]
	async fn empty_input_is_a_no_op() -> Result<()> {
		let store = MemoryStore::new();
		store.create_collection(image_to_tile_schema("art")).await?;
		assert_eq!(insert_chunked(&store, "art_image_to_tile", Vec::new(), 10).await?, 0);
		Ok(())
	}

	#[tokio::test]
	async fn ensure_absent_honors_repopulate() -> Result<()> {
		let store = MemoryStore::new();
		assert!(ensure_absent(&store, "art_image_to_tile", false).await?);

		store.create_collection(image_to_tile_schema("art")).await?;
		assert!(!ensure_absent(&store, "art_image_to_tile", false).await?);
		assert!(store.has_collection("art_image_to_tile").await?);

		assert!(ensure_absent(&store, "art_image_to_tile", true).await?);
		assert!(!store.has_collection("art_image_to_tile").await?);
		Ok(())
	}
}
