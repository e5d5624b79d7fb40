//! Query facade: every client-visible read operation in one place.
//!
//! Each operation resolves its collection handle through the lifecycle
//! registry (which loads/releases remote collections as request traffic
//! shifts), runs the store reads, and translates failures into the
//! [`QueryError`] taxonomy the HTTP layer maps onto status codes. Nothing
//! here retries: a store error surfaces immediately.

use anyhow::{anyhow, Context};
use semap_core::constants::{
	clusters_collection_name, image_to_tile_collection_name, FIELD_EMBEDDING, FIELD_INDEX, FIELD_PATH,
	FIELD_ZOOM_PLUS_TILE, FIRST_TILES_LEVELS, SEARCH_LIMIT,
};
use semap_core::{ImageRecord, QueryError, QueryResult, TextEncoder, TileCoord, TileRecord};
use semap_store::{CollectionRegistry, VectorStore};
use serde::Serialize;
use std::sync::Arc;

/// Metadata of one dataset as served to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
	pub number_of_entities: i64,
	pub zoom_levels: u8,
}

/// The coarsest tile at which an image appears as a representative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ImageTileAssignment {
	pub index: i64,
	pub zoom_plus_tile: [u32; 3],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImagePath {
	pub index: i64,
	pub path: String,
}

pub struct QueryFacade {
	registry: CollectionRegistry,
	encoder: Option<Arc<dyn TextEncoder>>,
}

impl QueryFacade {
	pub fn new(store: Arc<dyn VectorStore>, encoder: Option<Arc<dyn TextEncoder>>) -> QueryFacade {
		QueryFacade {
			registry: CollectionRegistry::new(store),
			encoder,
		}
	}

	/// Known dataset names; runs the Updater so freshly built collections
	/// appear without a restart.
	pub async fn list_collections(&self) -> QueryResult<Vec<String>> {
		Ok(self.registry.refresh().await?)
	}

	pub async fn collection_info(&self, dataset: &str) -> QueryResult<CollectionInfo> {
		match self.registry.dataset_info(dataset).await {
			Some(info) => Ok(CollectionInfo {
				number_of_entities: info.number_of_entities,
				zoom_levels: info.zoom_levels,
			}),
			None => Err(QueryError::not_found(format!("collection '{dataset}'"))),
		}
	}

	/// Embeds `text` and returns the closest image of the dataset.
	pub async fn search_by_text(&self, dataset: &str, text: &str) -> QueryResult<ImageRecord> {
		let encoder = self
			.encoder
			.as_ref()
			.ok_or_else(|| QueryError::Store(anyhow!("no text encoder configured")))?;
		let embedding = encoder
			.embed_text(text)
			.await
			.context("embedding the query text")
			.map_err(QueryError::Store)?;

		let handle = self.registry.acquire(dataset).await?;
		let hits = handle.search(FIELD_EMBEDDING, &embedding, 1, &ImageRecord::FIELDS).await?;
		let hit = hits
			.into_iter()
			.next()
			.ok_or_else(|| QueryError::not_found(format!("no images in '{dataset}'")))?;
		Ok(ImageRecord::from_row(&hit.row)?)
	}

	/// Tile entities by primary key. Unknown keys are skipped, matching the
	/// store's query semantics.
	pub async fn get_tiles(&self, dataset: &str, indexes: &[i64]) -> QueryResult<Vec<TileRecord>> {
		let handle = self.registry.acquire(&clusters_collection_name(dataset)).await?;
		let rows = handle.query(indexes, &["*"]).await?;
		let mut tiles = Vec::with_capacity(rows.len());
		for row in &rows {
			tiles.push(TileRecord::from_row(row)?);
		}
		Ok(tiles)
	}

	pub async fn image_to_tile(&self, dataset: &str, image_index: i64) -> QueryResult<ImageTileAssignment> {
		let handle = self.registry.acquire(&image_to_tile_collection_name(dataset)).await?;
		let rows = handle.query(&[image_index], &["*"]).await?;
		let row = rows
			.first()
			.ok_or_else(|| QueryError::not_found(format!("image {image_index} in '{dataset}'")))?;
		let coord = TileCoord::from_vector(row.get_float_vec(FIELD_ZOOM_PLUS_TILE).map_err(QueryError::Store)?)?;
		Ok(ImageTileAssignment {
			index: image_index,
			zoom_plus_tile: [u32::from(coord.z()), coord.x(), coord.y()],
		})
	}

	pub async fn paths(&self, dataset: &str, indexes: &[i64]) -> QueryResult<Vec<ImagePath>> {
		let handle = self.registry.acquire(dataset).await?;
		let rows = handle.query(indexes, &[FIELD_INDEX, FIELD_PATH]).await?;
		let mut paths = Vec::with_capacity(rows.len());
		for row in &rows {
			paths.push(ImagePath {
				index: row.get_int(FIELD_INDEX).map_err(QueryError::Store)?,
				path: row.get_str(FIELD_PATH).map_err(QueryError::Store)?.to_string(),
			});
		}
		Ok(paths)
	}

	/// The `k` most similar images to `image_index`, the image itself first.
	pub async fn neighbors(&self, dataset: &str, image_index: i64, k: usize) -> QueryResult<Vec<ImageRecord>> {
		let handle = self.registry.acquire(dataset).await?;
		let rows = handle.query(&[image_index], &[FIELD_EMBEDDING]).await?;
		let row = rows
			.first()
			.ok_or_else(|| QueryError::not_found(format!("image {image_index} in '{dataset}'")))?;
		let embedding = row.get_float_vec(FIELD_EMBEDDING).map_err(QueryError::Store)?.to_vec();

		let hits = handle.search(FIELD_EMBEDDING, &embedding, k, &ImageRecord::FIELDS).await?;
		let mut neighbors = Vec::with_capacity(hits.len());
		for hit in &hits {
			neighbors.push(ImageRecord::from_row(&hit.row)?);
		}
		Ok(neighbors)
	}

	/// The complete top of the pyramid: all tiles of the first
	/// [`FIRST_TILES_LEVELS`] levels, fetched in primary-key batches.
	pub async fn first_tiles(&self, dataset: &str) -> QueryResult<Vec<TileRecord>> {
		let handle = self.registry.acquire(&clusters_collection_name(dataset)).await?;
		let available = handle.num_entities().await?;
		let limit = available.min(TileCoord::pyramid_len(FIRST_TILES_LEVELS));

		let mut tiles = Vec::with_capacity(usize::try_from(limit).unwrap_or(0));
		let mut start = 0i64;
		while start < limit {
			let end = (start + SEARCH_LIMIT as i64).min(limit);
			let ids: Vec<i64> = (start..end).collect();
			let rows = handle.query(&ids, &["*"]).await?;
			for row in &rows {
				tiles.push(TileRecord::from_row(row)?);
			}
			start = end;
		}
		Ok(tiles)
	}
}

impl std::fmt::Debug for QueryFacade {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QueryFacade")
			.field("registry", &self.registry)
			.field("encoder", &self.encoder.is_some())
			.finish()
	}
}
