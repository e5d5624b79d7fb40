//! The vector-store interface consumed by the builder and the serving path.
//!
//! The trait mirrors the subset of a typed vector database the system relies
//! on: named collections with declared schemas, batched inserts with an
//! explicit flush, primary-key queries, and exact vector search. It is
//! object-safe so engines can be swapped behind `Arc<dyn VectorStore>`.

use anyhow::Result;
use async_trait::async_trait;
use semap_core::{CollectionSchema, Row};
use std::fmt::Debug;

/// One result of a vector search.
///
/// `distance` is normalized so that smaller always means closer: squared
/// euclidean distance for L2 fields, `1 − similarity` for cosine fields.
/// A distance of exactly 0 therefore signals an exact match under either
/// metric, which the tile re-fetch path depends on.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
	pub id: i64,
	pub distance: f32,
	pub row: Row,
}

#[async_trait]
pub trait VectorStore: Debug + Send + Sync {
	/// Names of all collections, sorted.
	async fn list_collections(&self) -> Result<Vec<String>>;

	async fn has_collection(&self, name: &str) -> Result<bool>;

	/// Creates an empty collection. Fails if the name is taken.
	async fn create_collection(&self, schema: CollectionSchema) -> Result<()>;

	/// Drops a collection and its data. Dropping an unknown name is an error.
	async fn drop_collection(&self, name: &str) -> Result<()>;

	async fn schema(&self, name: &str) -> Result<CollectionSchema>;

	async fn num_entities(&self, name: &str) -> Result<i64>;

	/// Makes a collection queryable. Engines may materialize indexes or read
	/// data into memory here; `query` and `search` require it.
	async fn load_collection(&self, name: &str) -> Result<()>;

	/// Releases the resources held by [`VectorStore::load_collection`].
	async fn release_collection(&self, name: &str) -> Result<()>;

	/// Inserts rows after validating them against the schema. Duplicate
	/// primary keys are an error.
	async fn insert(&self, name: &str, rows: Vec<Row>) -> Result<()>;

	/// Makes previous inserts durable.
	async fn flush(&self, name: &str) -> Result<()>;

	/// Rows with the given primary keys, ascending by key, projected onto
	/// `fields` (`["*"]` for all). Unknown keys are skipped, not errors.
	async fn query(&self, name: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Row>>;

	/// Exact nearest-neighbor search on the vector field `field`, at most
	/// `limit` hits ordered by ascending [`SearchHit::distance`].
	async fn search(&self, name: &str, field: &str, vector: &[f32], limit: usize, fields: &[&str])
		-> Result<Vec<SearchHit>>;
}

/// Squared euclidean distance.
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
	a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cosine distance `1 − cos(a, b)`, with zero-norm inputs treated as
/// maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
	if norm_a == 0.0 || norm_b == 0.0 {
		return 1.0;
	}
	1.0 - dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn l2_squared_matches_hand_computation() {
		assert_eq!(l2_squared(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
		assert_eq!(l2_squared(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
	}

	#[test]
	fn cosine_distance_is_zero_for_parallel_vectors() {
		assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
		assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
		assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
	}

	#[test]
	fn cosine_distance_handles_zero_norm() {
		assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
	}
}
