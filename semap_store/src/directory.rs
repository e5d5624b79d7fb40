//! Directory-backed vector store.
//!
//! Persists each collection as a subdirectory holding `schema.json` and a
//! `rows.jsonl` file with one JSON object per row. Rows are read into memory
//! by `load_collection` (or lazily when written to) and dropped again on
//! release, so the load/release lifecycle has a real cost model even without
//! a remote database. I/O is plain blocking `std::fs`: collections are
//! written by the offline builder and read at load time, never on the
//! per-request hot path.

use crate::memory::search_rows;
use crate::store::{SearchHit, VectorStore};
use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use semap_core::{CollectionSchema, FieldKind, Row, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const SCHEMA_FILE: &str = "schema.json";
const ROWS_FILE: &str = "rows.jsonl";

struct DirCollection {
	schema: CollectionSchema,
	/// `None` while the rows only live on disk.
	rows: Option<BTreeMap<i64, Row>>,
	queryable: bool,
	dirty: bool,
}

pub struct DirectoryStore {
	root: PathBuf,
	collections: RwLock<BTreeMap<String, DirCollection>>,
}

impl fmt::Debug for DirectoryStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DirectoryStore").field("root", &self.root).finish()
	}
}

impl DirectoryStore {
	/// Opens (and creates if necessary) a store rooted at `root`. Existing
	/// collection directories are registered; their rows stay on disk until
	/// loaded.
	pub fn open(root: impl Into<PathBuf>) -> Result<DirectoryStore> {
		let root = root.into();
		fs::create_dir_all(&root).with_context(|| format!("creating store root {root:?}"))?;
		let mut collections = BTreeMap::new();
		for schema in scan_schemas(&root)? {
			collections.insert(
				schema.name.clone(),
				DirCollection {
					schema,
					rows: None,
					queryable: false,
					dirty: false,
				},
			);
		}
		Ok(DirectoryStore {
			root,
			collections: RwLock::new(collections),
		})
	}

	fn collection_dir(&self, name: &str) -> PathBuf {
		self.root.join(name)
	}

	fn read_rows(&self, schema: &CollectionSchema) -> Result<BTreeMap<i64, Row>> {
		let path = self.collection_dir(&schema.name).join(ROWS_FILE);
		let mut rows = BTreeMap::new();
		if !path.is_file() {
			return Ok(rows);
		}
		let file = fs::File::open(&path).with_context(|| format!("opening {path:?}"))?;
		for (number, line) in BufReader::new(file).lines().enumerate() {
			let line = line.with_context(|| format!("reading {path:?}"))?;
			if line.trim().is_empty() {
				continue;
			}
			let json: serde_json::Value =
				serde_json::from_str(&line).with_context(|| format!("{path:?} line {}", number + 1))?;
			let row = row_from_json(schema, &json).with_context(|| format!("{path:?} line {}", number + 1))?;
			let id = schema.primary_key(&row)?;
			ensure!(rows.insert(id, row).is_none(), "{path:?} repeats primary key {id}");
		}
		Ok(rows)
	}

	fn write_rows(&self, schema: &CollectionSchema, rows: &BTreeMap<i64, Row>) -> Result<()> {
		let dir = self.collection_dir(&schema.name);
		let tmp = dir.join(format!("{ROWS_FILE}.tmp"));
		{
			let file = fs::File::create(&tmp).with_context(|| format!("creating {tmp:?}"))?;
			let mut writer = BufWriter::new(file);
			for row in rows.values() {
				serde_json::to_writer(&mut writer, &row_to_json(row))?;
				writer.write_all(b"\n")?;
			}
			writer.flush()?;
		}
		fs::rename(&tmp, dir.join(ROWS_FILE)).with_context(|| format!("replacing rows of '{}'", schema.name))?;
		Ok(())
	}

	fn ensure_rows(&self, collection: &mut DirCollection) -> Result<()> {
		if collection.rows.is_none() {
			collection.rows = Some(self.read_rows(&collection.schema)?);
		}
		Ok(())
	}
}

/// Schemas of all collection directories under `root`.
fn scan_schemas(root: &Path) -> Result<Vec<CollectionSchema>> {
	let mut found = Vec::new();
	for entry in fs::read_dir(root).with_context(|| format!("reading store root {root:?}"))? {
		let entry = entry?;
		let schema_path = entry.path().join(SCHEMA_FILE);
		if !schema_path.is_file() {
			continue;
		}
		let file = fs::File::open(&schema_path).with_context(|| format!("opening {schema_path:?}"))?;
		let schema: CollectionSchema =
			serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing {schema_path:?}"))?;
		found.push(schema);
	}
	Ok(found)
}

/// Collection names become directory names, so keep them path-safe.
fn check_name(name: &str) -> Result<()> {
	ensure!(
		!name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
		"collection name '{name}' must be non-empty and [a-zA-Z0-9_-]"
	);
	Ok(())
}

fn row_to_json(row: &Row) -> serde_json::Value {
	let mut object = serde_json::Map::new();
	for (name, value) in row {
		let json = match value {
			Value::Int(v) => serde_json::json!(v),
			Value::Float(v) => serde_json::json!(v),
			Value::Str(v) => serde_json::json!(v),
			Value::FloatVec(v) => serde_json::json!(v),
			Value::Json(v) => v.clone(),
		};
		object.insert(name.clone(), json);
	}
	serde_json::Value::Object(object)
}

/// Rebuilds typed values from a JSON object. Fields declared in the schema
/// decode by their declared kind; undeclared (dataset-specific) fields fall
/// back to a shape-based guess.
fn row_from_json(schema: &CollectionSchema, json: &serde_json::Value) -> Result<Row> {
	let Some(object) = json.as_object() else {
		bail!("row is not a JSON object");
	};
	let mut row = Row::new();
	for (name, value) in object {
		let typed = match schema.field(name).map(|f| &f.kind) {
			Some(FieldKind::Int64) => Value::Int(
				value
					.as_i64()
					.with_context(|| format!("field '{name}' is not an integer"))?,
			),
			Some(FieldKind::Float) => Value::Float(
				value.as_f64().with_context(|| format!("field '{name}' is not a number"))? as f32,
			),
			Some(FieldKind::VarChar) => Value::Str(
				value
					.as_str()
					.with_context(|| format!("field '{name}' is not a string"))?
					.to_string(),
			),
			Some(FieldKind::FloatVector { .. }) => {
				let items = value
					.as_array()
					.with_context(|| format!("field '{name}' is not an array"))?;
				let mut vec = Vec::with_capacity(items.len());
				for item in items {
					vec.push(item.as_f64().with_context(|| format!("field '{name}' has a non-number component"))? as f32);
				}
				Value::FloatVec(vec)
			}
			Some(FieldKind::Json) => Value::Json(value.clone()),
			None => match value {
				serde_json::Value::Number(n) if n.is_i64() => Value::Int(n.as_i64().unwrap()),
				serde_json::Value::Number(n) => Value::Float(n.as_f64().unwrap() as f32),
				serde_json::Value::String(s) => Value::Str(s.clone()),
				other => Value::Json(other.clone()),
			},
		};
		row.set(name, typed);
	}
	Ok(row)
}

#[async_trait]
impl VectorStore for DirectoryStore {
	async fn list_collections(&self) -> Result<Vec<String>> {
		// Pick up collections created by other processes since open().
		let found = scan_schemas(&self.root)?;
		let mut collections = self.collections.write().await;
		for schema in found {
			collections.entry(schema.name.clone()).or_insert(DirCollection {
				schema,
				rows: None,
				queryable: false,
				dirty: false,
			});
		}
		Ok(collections.keys().cloned().collect())
	}

	async fn has_collection(&self, name: &str) -> Result<bool> {
		Ok(self.collections.read().await.contains_key(name))
	}

	async fn create_collection(&self, schema: CollectionSchema) -> Result<()> {
		check_name(&schema.name)?;
		let mut collections = self.collections.write().await;
		ensure!(
			!collections.contains_key(&schema.name),
			"collection '{}' already exists",
			schema.name
		);
		let dir = self.collection_dir(&schema.name);
		fs::create_dir_all(&dir).with_context(|| format!("creating {dir:?}"))?;
		let file = fs::File::create(dir.join(SCHEMA_FILE))?;
		serde_json::to_writer_pretty(BufWriter::new(file), &schema)?;
		collections.insert(
			schema.name.clone(),
			DirCollection {
				schema,
				rows: Some(BTreeMap::new()),
				queryable: false,
				dirty: false,
			},
		);
		Ok(())
	}

	async fn drop_collection(&self, name: &str) -> Result<()> {
		let mut collections = self.collections.write().await;
		ensure!(collections.remove(name).is_some(), "collection '{name}' does not exist");
		let dir = self.collection_dir(name);
		if dir.is_dir() {
			fs::remove_dir_all(&dir).with_context(|| format!("removing {dir:?}"))?;
		}
		Ok(())
	}

	async fn schema(&self, name: &str) -> Result<CollectionSchema> {
		let collections = self.collections.read().await;
		match collections.get(name) {
			Some(collection) => Ok(collection.schema.clone()),
			None => bail!("collection '{name}' does not exist"),
		}
	}

	async fn num_entities(&self, name: &str) -> Result<i64> {
		let mut collections = self.collections.write().await;
		let Some(collection) = collections.get_mut(name) else {
			bail!("collection '{name}' does not exist");
		};
		self.ensure_rows(collection)?;
		Ok(collection.rows.as_ref().unwrap().len() as i64)
	}

	async fn load_collection(&self, name: &str) -> Result<()> {
		let mut collections = self.collections.write().await;
		let Some(collection) = collections.get_mut(name) else {
			bail!("collection '{name}' does not exist");
		};
		self.ensure_rows(collection)?;
		collection.queryable = true;
		Ok(())
	}

	async fn release_collection(&self, name: &str) -> Result<()> {
		let mut collections = self.collections.write().await;
		let Some(collection) = collections.get_mut(name) else {
			bail!("collection '{name}' does not exist");
		};
		collection.queryable = false;
		if !collection.dirty {
			// Unflushed rows must survive the release.
			collection.rows = None;
		}
		Ok(())
	}

	async fn insert(&self, name: &str, rows: Vec<Row>) -> Result<()> {
		let mut collections = self.collections.write().await;
		let Some(collection) = collections.get_mut(name) else {
			bail!("collection '{name}' does not exist");
		};
		self.ensure_rows(collection)?;
		let stored = collection.rows.as_mut().unwrap();
		for row in rows {
			collection.schema.validate_row(&row)?;
			let id = collection.schema.primary_key(&row)?;
			ensure!(!stored.contains_key(&id), "collection '{name}' already has primary key {id}");
			stored.insert(id, row);
		}
		collection.dirty = true;
		Ok(())
	}

	async fn flush(&self, name: &str) -> Result<()> {
		let mut collections = self.collections.write().await;
		let Some(collection) = collections.get_mut(name) else {
			bail!("collection '{name}' does not exist");
		};
		if collection.dirty {
			self.write_rows(&collection.schema, collection.rows.as_ref().unwrap())?;
			collection.dirty = false;
		}
		Ok(())
	}

	async fn query(&self, name: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Row>> {
		let collections = self.collections.read().await;
		let Some(collection) = collections.get(name) else {
			bail!("collection '{name}' does not exist");
		};
		ensure!(collection.queryable, "collection '{name}' is not loaded");
		let rows = collection.rows.as_ref().unwrap();
		let mut sorted: Vec<i64> = ids.to_vec();
		sorted.sort_unstable();
		sorted.dedup();
		Ok(
			sorted
				.iter()
				.filter_map(|id| rows.get(id))
				.map(|row| row.project(fields))
				.collect(),
		)
	}

	async fn search(&self, name: &str, field: &str, vector: &[f32], limit: usize, fields: &[&str])
		-> Result<Vec<SearchHit>> {
		let collections = self.collections.read().await;
		let Some(collection) = collections.get(name) else {
			bail!("collection '{name}' does not exist");
		};
		ensure!(collection.queryable, "collection '{name}' is not loaded");
		search_rows(
			&collection.schema,
			collection.rows.as_ref().unwrap().iter(),
			field,
			vector,
			limit,
			fields,
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use semap_core::constants::{FIELD_INDEX, FIELD_ZOOM_PLUS_TILE};
	use semap_core::image_to_tile_schema;

	fn row(id: i64, z: f32, x: f32, y: f32) -> Row {
		Row::new()
			.with(FIELD_INDEX, Value::Int(id))
			.with(FIELD_ZOOM_PLUS_TILE, Value::FloatVec(vec![z, x, y]))
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn rows_survive_reopen() -> Result<()> {
		let dir = tempfile::tempdir()?;
		{
			let store = DirectoryStore::open(dir.path())?;
			store.create_collection(image_to_tile_schema("art")).await?;
			store
				.insert("art_image_to_tile", vec![row(0, 0.0, 0.0, 0.0), row(1, 1.0, 0.0, 1.0)])
				.await?;
			store.flush("art_image_to_tile").await?;
		}

		let store = DirectoryStore::open(dir.path())?;
		assert_eq!(store.list_collections().await?, vec!["art_image_to_tile".to_string()]);
		// The schema file round-trips with the data.
		assert_eq!(store.schema("art_image_to_tile").await?, image_to_tile_schema("art"));
		assert_eq!(store.num_entities("art_image_to_tile").await?, 2);
		store.load_collection("art_image_to_tile").await?;
		let rows = store.query("art_image_to_tile", &[1], &["*"]).await?;
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].get_float_vec(FIELD_ZOOM_PLUS_TILE)?, &[1.0, 0.0, 1.0]);
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn release_drops_rows_and_load_restores_them() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = DirectoryStore::open(dir.path())?;
		store.create_collection(image_to_tile_schema("art")).await?;
		store.insert("art_image_to_tile", vec![row(0, 0.0, 0.0, 0.0)]).await?;
		store.flush("art_image_to_tile").await?;

		store.load_collection("art_image_to_tile").await?;
		assert_eq!(store.query("art_image_to_tile", &[0], &["*"]).await?.len(), 1);
		store.release_collection("art_image_to_tile").await?;
		assert!(store.query("art_image_to_tile", &[0], &["*"]).await.is_err());
		store.load_collection("art_image_to_tile").await?;
		assert_eq!(store.query("art_image_to_tile", &[0], &["*"]).await?.len(), 1);
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn drop_removes_directory() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let store = DirectoryStore::open(dir.path())?;
		store.create_collection(image_to_tile_schema("art")).await?;
		assert!(dir.path().join("art_image_to_tile").is_dir());
		store.drop_collection("art_image_to_tile").await?;
		assert!(!dir.path().join("art_image_to_tile").exists());
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn search_works_after_reopen() -> Result<()> {
		let dir = tempfile::tempdir()?;
		{
			let store = DirectoryStore::open(dir.path())?;
			store.create_collection(image_to_tile_schema("art")).await?;
			store
				.insert(
					"art_image_to_tile",
					vec![row(0, 0.0, 0.0, 0.0), row(1, 1.0, 1.0, 0.0), row(2, 1.0, 0.0, 1.0)],
				)
				.await?;
			store.flush("art_image_to_tile").await?;
		}
		let store = DirectoryStore::open(dir.path())?;
		store.load_collection("art_image_to_tile").await?;
		let hits = store
			.search("art_image_to_tile", FIELD_ZOOM_PLUS_TILE, &[1.0, 1.0, 0.0], 1, &["*"])
			.await?;
		assert_eq!(hits[0].id, 1);
		assert_eq!(hits[0].distance, 0.0);
		Ok(())
	}

	#[test]
	fn names_must_be_path_safe() {
		assert!(check_name("wikiart_zoom_levels_clusters").is_ok());
		assert!(check_name("../evil").is_err());
		assert!(check_name("").is_err());
	}
}
