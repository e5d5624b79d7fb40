//! Collection lifecycle registry.
//!
//! Remote collections are heavyweight: a loaded collection holds index and
//! row data in memory on the store side. The registry bounds how many stay
//! loaded by giving every registered collection a countdown counter. Each
//! request touching collection `C` runs one atomic pass over all entries:
//! `C` is (re)loaded if idle and its counter jumps to `counter_max`; every
//! other entry is decremented and released when it reaches zero. Frequently
//! queried collections therefore stay resident, unused ones are released
//! deterministically after `counter_max` unrelated requests, and no
//! background reaper is needed.
//!
//! Lock order: the registry lock is always taken before entry locks, and
//! entry locks are taken one at a time.

use crate::store::{SearchHit, VectorStore};
use anyhow::{Context, Result};
use semap_core::constants::{clusters_collection_name, split_collection_name, COUNTER_MAX};
use semap_core::{QueryError, QueryResult, Row, TileCoord};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
struct CollectionEntry {
	counter: Mutex<u32>,
}

/// Cached per-dataset metadata, refreshed by the Updater pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatasetInfo {
	pub number_of_entities: i64,
	/// Maximum zoom level of the dataset's pyramid (0 when no clusters
	/// collection exists yet).
	pub zoom_levels: u8,
}

/// Read-only access to a collection for the duration of one request.
#[derive(Clone, Debug)]
pub struct CollectionHandle {
	name: String,
	store: Arc<dyn VectorStore>,
}

impl CollectionHandle {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub async fn num_entities(&self) -> Result<i64> {
		self.store.num_entities(&self.name).await
	}

	pub async fn query(&self, ids: &[i64], fields: &[&str]) -> Result<Vec<Row>> {
		self.store.query(&self.name, ids, fields).await
	}

	pub async fn search(&self, field: &str, vector: &[f32], limit: usize, fields: &[&str]) -> Result<Vec<SearchHit>> {
		self.store.search(&self.name, field, vector, limit, fields).await
	}
}

pub struct CollectionRegistry {
	store: Arc<dyn VectorStore>,
	counter_max: u32,
	entries: Mutex<BTreeMap<String, Arc<CollectionEntry>>>,
	datasets: Mutex<BTreeMap<String, DatasetInfo>>,
	/// Serializes Updater passes; independent of the registry lock.
	refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for CollectionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CollectionRegistry")
			.field("counter_max", &self.counter_max)
			.finish_non_exhaustive()
	}
}

impl CollectionRegistry {
	pub fn new(store: Arc<dyn VectorStore>) -> CollectionRegistry {
		CollectionRegistry::with_counter_max(store, COUNTER_MAX)
	}

	pub fn with_counter_max(store: Arc<dyn VectorStore>, counter_max: u32) -> CollectionRegistry {
		CollectionRegistry {
			store,
			counter_max: counter_max.max(1),
			entries: Mutex::new(BTreeMap::new()),
			datasets: Mutex::new(BTreeMap::new()),
			refresh_lock: Mutex::new(()),
		}
	}

	/// The Updater: enumerates the store's collections, registers missing
	/// entries for the recognized family suffixes, refreshes the cached
	/// dataset metadata, and returns the sorted dataset names.
	pub async fn refresh(&self) -> Result<Vec<String>> {
		let _updating = self.refresh_lock.lock().await;

		let names = self.store.list_collections().await.context("enumerating collections")?;
		let mut dataset_names: Vec<String> = Vec::new();
		for name in &names {
			let (dataset, suffix) = split_collection_name(name);
			if suffix.is_empty() {
				dataset_names.push(dataset.to_string());
			}
		}

		{
			let mut entries = self.entries.lock().await;
			for name in &names {
				let (dataset, suffix) = split_collection_name(name);
				// Family collections only count with their base dataset present.
				if !suffix.is_empty() && !dataset_names.iter().any(|d| d == dataset) {
					continue;
				}
				entries
					.entry(name.clone())
					.or_insert_with(|| Arc::new(CollectionEntry { counter: Mutex::new(0) }));
			}
		}

		let mut infos = BTreeMap::new();
		for dataset in &dataset_names {
			let number_of_entities = self.store.num_entities(dataset).await?;
			let clusters = clusters_collection_name(dataset);
			let zoom_levels = if names.contains(&clusters) {
				zoom_levels_for_tile_count(self.store.num_entities(&clusters).await?)
			} else {
				0
			};
			infos.insert(
				dataset.clone(),
				DatasetInfo {
					number_of_entities,
					zoom_levels,
				},
			);
		}
		*self.datasets.lock().await = infos;

		Ok(dataset_names)
	}

	/// Cached metadata of `dataset`, if it was seen by the last refresh.
	pub async fn dataset_info(&self, dataset: &str) -> Option<DatasetInfo> {
		self.datasets.lock().await.get(dataset).copied()
	}

	/// Runs the access protocol for `name` and hands out a read-only handle.
	///
	/// Unknown names yield [`QueryError::NotFound`]; the next refresh will
	/// pick up collections created since the last one.
	pub async fn acquire(&self, name: &str) -> QueryResult<CollectionHandle> {
		let entries = self.entries.lock().await;
		if !entries.contains_key(name) {
			return Err(QueryError::not_found(format!("collection '{name}'")));
		}

		for (entry_name, entry) in entries.iter() {
			let mut counter = entry.counter.lock().await;
			if entry_name == name {
				if *counter == 0 {
					self
						.store
						.load_collection(entry_name)
						.await
						.with_context(|| format!("loading collection '{entry_name}'"))?;
				}
				*counter = self.counter_max;
			} else {
				if *counter == 1 {
					self
						.store
						.release_collection(entry_name)
						.await
						.with_context(|| format!("releasing collection '{entry_name}'"))?;
				}
				*counter = counter.saturating_sub(1);
			}
		}

		Ok(CollectionHandle {
			name: name.to_string(),
			store: Arc::clone(&self.store),
		})
	}

	/// Current counter of `name`; `None` if unregistered. Test hook.
	pub async fn counter(&self, name: &str) -> Option<u32> {
		let entries = self.entries.lock().await;
		let entry = entries.get(name)?;
		Some(*entry.counter.lock().await)
	}
}

/// Max zoom level of a pyramid with `tiles` tiles (`Σ 4^i` inverse).
fn zoom_levels_for_tile_count(tiles: i64) -> u8 {
	let mut levels = 0u8;
	while TileCoord::pyramid_len(levels + 1) <= tiles && levels < 30 {
		levels += 1;
	}
	levels.saturating_sub(1)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryStore;
	use semap_core::constants::{FIELD_INDEX, FIELD_ZOOM_PLUS_TILE};
	use semap_core::{clusters_schema, embeddings_schema, image_to_tile_schema, Value};

	async fn store_with(datasets: &[&str]) -> Arc<MemoryStore> {
		let store = Arc::new(MemoryStore::new());
		for dataset in datasets {
			store.create_collection(embeddings_schema(dataset)).await.unwrap();
			store.create_collection(clusters_schema(dataset)).await.unwrap();
			store.create_collection(image_to_tile_schema(dataset)).await.unwrap();
		}
		store
	}

	#[tokio::test]
	async fn refresh_returns_datasets_and_registers_families() -> Result<()> {
		let store = store_with(&["art", "mnist"]).await;
		let registry = CollectionRegistry::new(store);
		let datasets = registry.refresh().await?;
		assert_eq!(datasets, vec!["art".to_string(), "mnist".to_string()]);
		assert_eq!(registry.counter("art").await, Some(0));
		assert_eq!(registry.counter("art_zoom_levels_clusters").await, Some(0));
		assert_eq!(registry.counter("art_image_to_tile").await, Some(0));
		Ok(())
	}

	#[tokio::test]
	async fn acquire_unknown_is_not_found() {
		let store = store_with(&[]).await;
		let registry = CollectionRegistry::new(store);
		registry.refresh().await.unwrap();
		match registry.acquire("nope").await {
			Err(QueryError::NotFound(_)) => {}
			other => panic!("expected NotFound, got {other:?}"),
		}
	}

	/// Scenario E4: with counter_max = 3 the sequence A A B B B B leaves A
	/// released with counter 0 and B loaded with counter 3.
	#[tokio::test]
	async fn countdown_releases_unused_collections() -> Result<()> {
		let store = Arc::new(MemoryStore::new());
		store.create_collection(embeddings_schema("a")).await?;
		store.create_collection(embeddings_schema("b")).await?;
		let registry = CollectionRegistry::with_counter_max(Arc::clone(&store) as Arc<dyn VectorStore>, 3);
		registry.refresh().await?;

		for name in ["a", "a", "b", "b", "b", "b"] {
			registry.acquire(name).await.unwrap();
		}

		assert_eq!(registry.counter("a").await, Some(0));
		assert_eq!(registry.counter("b").await, Some(3));

		// 'a' was released: a direct query without a fresh load must fail,
		// while 'b' is still queryable.
		assert!(store.query("a", &[0], &["*"]).await.is_err());
		assert!(store.query("b", &[0], &["*"]).await.is_ok());
		Ok(())
	}

	/// Property 6: k requests to C followed by counter_max requests to other
	/// collections release C exactly once, after the last of those.
	#[tokio::test]
	async fn release_happens_exactly_after_counter_max_other_requests() -> Result<()> {
		let store = Arc::new(MemoryStore::new());
		store.create_collection(embeddings_schema("c")).await?;
		store.create_collection(embeddings_schema("other")).await?;
		let counter_max = 4u32;
		let registry = CollectionRegistry::with_counter_max(Arc::clone(&store) as Arc<dyn VectorStore>, counter_max);
		registry.refresh().await?;

		for _ in 0..3 {
			registry.acquire("c").await.unwrap();
		}
		for step in 1..=counter_max {
			registry.acquire("other").await.unwrap();
			let still_loaded = store.query("c", &[0], &["*"]).await.is_ok();
			assert_eq!(still_loaded, step < counter_max, "after {step} unrelated requests");
		}
		assert_eq!(registry.counter("c").await, Some(0));
		Ok(())
	}

	#[tokio::test]
	async fn acquire_reloads_after_release() -> Result<()> {
		let store = Arc::new(MemoryStore::new());
		store.create_collection(embeddings_schema("a")).await?;
		store.create_collection(embeddings_schema("b")).await?;
		let registry = CollectionRegistry::with_counter_max(Arc::clone(&store) as Arc<dyn VectorStore>, 2);
		registry.refresh().await?;

		registry.acquire("a").await.unwrap();
		registry.acquire("b").await.unwrap();
		registry.acquire("b").await.unwrap();
		// 'a' hit zero and was released.
		assert!(store.query("a", &[0], &["*"]).await.is_err());

		registry.acquire("a").await.unwrap();
		assert!(store.query("a", &[0], &["*"]).await.is_ok());
		Ok(())
	}

	#[tokio::test]
	async fn refresh_caches_dataset_metadata() -> Result<()> {
		let store = store_with(&["art"]).await;
		// Populate a two-level pyramid: 1 + 4 tiles.
		let rows: Vec<Row> = (0..5)
			.map(|i| {
				let coord = TileCoord::from_flat_index(i).unwrap();
				Row::new()
					.with(FIELD_INDEX, Value::Int(i))
					.with(FIELD_ZOOM_PLUS_TILE, Value::FloatVec(coord.as_vector().to_vec()))
					.with("data", Value::Json(serde_json::json!([])))
			})
			.collect();
		store.insert("art_zoom_levels_clusters", rows).await?;

		let registry = CollectionRegistry::new(store);
		registry.refresh().await?;
		let info = registry.dataset_info("art").await.unwrap();
		assert_eq!(info.number_of_entities, 0);
		assert_eq!(info.zoom_levels, 1);
		assert_eq!(registry.dataset_info("unknown").await, None);
		Ok(())
	}

	#[test]
	fn zoom_levels_inverse_of_pyramid_len() {
		assert_eq!(zoom_levels_for_tile_count(0), 0);
		assert_eq!(zoom_levels_for_tile_count(1), 0);
		assert_eq!(zoom_levels_for_tile_count(5), 1);
		assert_eq!(zoom_levels_for_tile_count(21), 2);
		assert_eq!(zoom_levels_for_tile_count(21845), 7);
	}
}
