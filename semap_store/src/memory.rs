//! Exact in-memory vector store.
//!
//! Backs the `memory:` database URI and the test suites. Search is a flat
//! scan with the metric declared by the schema, which makes it a faithful
//! stand-in for a FLAT-indexed remote collection: same results, no
//! approximation.

use crate::store::{cosine_distance, l2_squared, SearchHit, VectorStore};
use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use semap_core::{CollectionSchema, Metric, Row};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::RwLock;

struct MemoryCollection {
	schema: CollectionSchema,
	rows: BTreeMap<i64, Row>,
	loaded: bool,
}

#[derive(Default)]
pub struct MemoryStore {
	collections: RwLock<BTreeMap<String, MemoryCollection>>,
}

impl MemoryStore {
	pub fn new() -> MemoryStore {
		MemoryStore::default()
	}
}

impl fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryStore").finish_non_exhaustive()
	}
}

/// Shared flat-scan search used by both engines.
pub(crate) fn search_rows<'a, I>(
	schema: &CollectionSchema,
	rows: I,
	field: &str,
	vector: &[f32],
	limit: usize,
	fields: &[&str],
) -> Result<Vec<SearchHit>>
where
	I: Iterator<Item = (&'a i64, &'a Row)>,
{
	let metric = schema.vector_metric(field)?;
	let mut hits: Vec<SearchHit> = Vec::new();
	for (id, row) in rows {
		let stored = row
			.get_float_vec(field)
			.with_context(|| format!("row {id} of '{}'", schema.name))?;
		ensure!(
			stored.len() == vector.len(),
			"query vector has {} components, field '{field}' has {}",
			vector.len(),
			stored.len()
		);
		let distance = match metric {
			Metric::L2 => l2_squared(stored, vector),
			Metric::Cosine => cosine_distance(stored, vector),
		};
		hits.push(SearchHit {
			id: *id,
			distance,
			row: row.project(fields),
		});
	}
	hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
	hits.truncate(limit);
	Ok(hits)
}

#[async_trait]
impl VectorStore for MemoryStore {
	async fn list_collections(&self) -> Result<Vec<String>> {
		Ok(self.collections.read().await.keys().cloned().collect())
	}

	async fn has_collection(&self, name: &str) -> Result<bool> {
		Ok(self.collections.read().await.contains_key(name))
	}

	async fn create_collection(&self, schema: CollectionSchema) -> Result<()> {
		let mut collections = self.collections.write().await;
		ensure!(
			!collections.contains_key(&schema.name),
			"collection '{}' already exists",
			schema.name
		);
		collections.insert(
			schema.name.clone(),
			MemoryCollection {
				schema,
				rows: BTreeMap::new(),
				loaded: false,
			},
		);
		Ok(())
	}

	async fn drop_collection(&self, name: &str) -> Result<()> {
		let mut collections = self.collections.write().await;
		ensure!(collections.remove(name).is_some(), "collection '{name}' does not exist");
		Ok(())
	}

	async fn schema(&self, name: &str) -> Result<CollectionSchema> {
		let collections = self.collections.read().await;
		let collection = get(&collections, name)?;
		Ok(collection.schema.clone())
	}

	async fn num_entities(&self, name: &str) -> Result<i64> {
		let collections = self.collections.read().await;
		Ok(get(&collections, name)?.rows.len() as i64)
	}

	async fn load_collection(&self, name: &str) -> Result<()> {
		let mut collections = self.collections.write().await;
		get_mut(&mut collections, name)?.loaded = true;
		Ok(())
	}

	async fn release_collection(&self, name: &str) -> Result<()> {
		let mut collections = self.collections.write().await;
		get_mut(&mut collections, name)?.loaded = false;
		Ok(())
	}

	async fn insert(&self, name: &str, rows: Vec<Row>) -> Result<()> {
		let mut collections = self.collections.write().await;
		let collection = get_mut(&mut collections, name)?;
		for row in rows {
			collection.schema.validate_row(&row)?;
			let id = collection.schema.primary_key(&row)?;
			ensure!(
				!collection.rows.contains_key(&id),
				"collection '{name}' already has primary key {id}"
			);
			collection.rows.insert(id, row);
		}
		Ok(())
	}

	async fn flush(&self, _name: &str) -> Result<()> {
		// Inserts are immediately visible in memory.
		Ok(())
	}

	async fn query(&self, name: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Row>> {
		let collections = self.collections.read().await;
		let collection = get(&collections, name)?;
		ensure!(collection.loaded, "collection '{name}' is not loaded");
		let mut sorted: Vec<i64> = ids.to_vec();
		sorted.sort_unstable();
		sorted.dedup();
		Ok(
			sorted
				.iter()
				.filter_map(|id| collection.rows.get(id))
				.map(|row| row.project(fields))
				.collect(),
		)
	}

	async fn search(&self, name: &str, field: &str, vector: &[f32], limit: usize, fields: &[&str])
		-> Result<Vec<SearchHit>> {
		let collections = self.collections.read().await;
		let collection = get(&collections, name)?;
		ensure!(collection.loaded, "collection '{name}' is not loaded");
		search_rows(&collection.schema, collection.rows.iter(), field, vector, limit, fields)
	}
}

fn get<'a>(collections: &'a BTreeMap<String, MemoryCollection>, name: &str) -> Result<&'a MemoryCollection> {
	match collections.get(name) {
		Some(collection) => Ok(collection),
		None => bail!("collection '{name}' does not exist"),
	}
}

fn get_mut<'a>(collections: &'a mut BTreeMap<String, MemoryCollection>, name: &str) -> Result<&'a mut MemoryCollection> {
	match collections.get_mut(name) {
		Some(collection) => Ok(collection),
		None => bail!("collection '{name}' does not exist"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use semap_core::constants::{FIELD_EMBEDDING, FIELD_INDEX};
	use semap_core::{FieldSchema, Value};

	fn schema(name: &str) -> CollectionSchema {
		CollectionSchema::new(
			name,
			vec![
				FieldSchema::primary_int64(FIELD_INDEX),
				FieldSchema::float_vector(FIELD_EMBEDDING, 2, Metric::Cosine),
				FieldSchema::varchar("path"),
			],
		)
		.unwrap()
	}

	fn row(id: i64, vec: [f32; 2]) -> Row {
		Row::new()
			.with(FIELD_INDEX, Value::Int(id))
			.with(FIELD_EMBEDDING, Value::FloatVec(vec.to_vec()))
			.with("path", Value::Str(format!("{id}.jpg")))
	}

	#[tokio::test]
	async fn create_insert_query_round_trip() -> Result<()> {
		let store = MemoryStore::new();
		store.create_collection(schema("imgs")).await?;
		store.insert("imgs", vec![row(0, [1.0, 0.0]), row(1, [0.0, 1.0])]).await?;
		store.flush("imgs").await?;
		assert_eq!(store.num_entities("imgs").await?, 2);

		store.load_collection("imgs").await?;
		let rows = store.query("imgs", &[1, 0, 7], &["path"]).await?;
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].get_str("path")?, "0.jpg");
		assert_eq!(rows[1].get_str("path")?, "1.jpg");
		Ok(())
	}

	#[tokio::test]
	async fn query_requires_load() -> Result<()> {
		let store = MemoryStore::new();
		store.create_collection(schema("imgs")).await?;
		store.insert("imgs", vec![row(0, [1.0, 0.0])]).await?;
		assert!(store.query("imgs", &[0], &["*"]).await.is_err());
		store.load_collection("imgs").await?;
		assert!(store.query("imgs", &[0], &["*"]).await.is_ok());
		store.release_collection("imgs").await?;
		assert!(store.query("imgs", &[0], &["*"]).await.is_err());
		Ok(())
	}

	#[tokio::test]
	async fn search_orders_by_distance_then_id() -> Result<()> {
		let store = MemoryStore::new();
		store.create_collection(schema("imgs")).await?;
		store
			.insert("imgs", vec![row(0, [1.0, 0.0]), row(1, [0.0, 1.0]), row(2, [1.0, 0.0])])
			.await?;
		store.load_collection("imgs").await?;

		let hits = store.search("imgs", FIELD_EMBEDDING, &[1.0, 0.0], 2, &["*"]).await?;
		assert_eq!(hits.len(), 2);
		// Two exact matches; the tie breaks by id.
		assert_eq!(hits[0].id, 0);
		assert_eq!(hits[0].distance, 0.0);
		assert_eq!(hits[1].id, 2);
		Ok(())
	}

	#[tokio::test]
	async fn insert_rejects_duplicates_and_bad_rows() -> Result<()> {
		let store = MemoryStore::new();
		store.create_collection(schema("imgs")).await?;
		store.insert("imgs", vec![row(0, [1.0, 0.0])]).await?;
		assert!(store.insert("imgs", vec![row(0, [1.0, 0.0])]).await.is_err());
		let short = Row::new()
			.with(FIELD_INDEX, Value::Int(9))
			.with(FIELD_EMBEDDING, Value::FloatVec(vec![1.0]))
			.with("path", Value::Str("9.jpg".to_string()));
		assert!(store.insert("imgs", vec![short]).await.is_err());
		Ok(())
	}

	#[tokio::test]
	async fn drop_removes_collection() -> Result<()> {
		let store = MemoryStore::new();
		store.create_collection(schema("imgs")).await?;
		assert!(store.has_collection("imgs").await?);
		store.drop_collection("imgs").await?;
		assert!(!store.has_collection("imgs").await?);
		assert!(store.drop_collection("imgs").await.is_err());
		Ok(())
	}
}
