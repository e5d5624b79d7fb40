//! Tunables and collection/field naming shared by the builder and the server.

/// Dimensionality of the image/text embedding vectors.
pub const EMBEDDING_DIM: usize = 512;

/// Dimensionality of the `zoom_plus_tile` vector: `[zoom, tile_x, tile_y]`.
pub const TILE_VECTOR_DIM: usize = 3;

/// Hard upper bound on representatives per tile.
pub const MAX_PER_TILE: usize = 30;

/// Target cluster count for oversized tiles.
pub const NUMBER_OF_CLUSTERS: usize = 30;

/// Rows per insert batch.
pub const INSERT_SIZE: usize = 500;

/// Rows per primary-key query batch.
pub const SEARCH_LIMIT: usize = 16384;

/// Requests a collection survives without being queried before release.
pub const COUNTER_MAX: u32 = 10;

/// Soft bound on resident, not-yet-flushed tiles in the builder.
pub const LIMIT_FOR_INSERT: usize = 1_000_000;

/// `first_tiles` returns the complete top of the pyramid: the 8 levels
/// `0..8`, i.e. `Σ 4^i for i in 0..8` = 21,845 tiles.
pub const FIRST_TILES_LEVELS: u8 = 8;

/// Cosine-similarity threshold of the optional cluster-merge pass.
pub const MERGE_THRESHOLD: f32 = 0.8;

pub const CLUSTERS_SUFFIX: &str = "_zoom_levels_clusters";
pub const IMAGE_TO_TILE_SUFFIX: &str = "_image_to_tile";

pub const FIELD_INDEX: &str = "index";
pub const FIELD_EMBEDDING: &str = "embedding";
pub const FIELD_X: &str = "x";
pub const FIELD_Y: &str = "y";
pub const FIELD_PATH: &str = "path";
pub const FIELD_WIDTH: &str = "width";
pub const FIELD_HEIGHT: &str = "height";
pub const FIELD_ZOOM_PLUS_TILE: &str = "zoom_plus_tile";
pub const FIELD_DATA: &str = "data";
pub const FIELD_RANGE: &str = "range";

/// Name of the clusters collection of a dataset.
pub fn clusters_collection_name(dataset: &str) -> String {
	format!("{dataset}{CLUSTERS_SUFFIX}")
}

/// Name of the image-to-tile collection of a dataset.
pub fn image_to_tile_collection_name(dataset: &str) -> String {
	format!("{dataset}{IMAGE_TO_TILE_SUFFIX}")
}

/// Splits a collection name into its dataset name and family suffix.
pub fn split_collection_name(name: &str) -> (&str, &str) {
	for suffix in [CLUSTERS_SUFFIX, IMAGE_TO_TILE_SUFFIX] {
		if let Some(dataset) = name.strip_suffix(suffix) {
			if !dataset.is_empty() {
				return (dataset, suffix);
			}
		}
	}
	(name, "")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn collection_names_round_trip() {
		assert_eq!(clusters_collection_name("wikiart"), "wikiart_zoom_levels_clusters");
		assert_eq!(image_to_tile_collection_name("wikiart"), "wikiart_image_to_tile");
		assert_eq!(
			split_collection_name("wikiart_zoom_levels_clusters"),
			("wikiart", CLUSTERS_SUFFIX)
		);
		assert_eq!(split_collection_name("wikiart_image_to_tile"), ("wikiart", IMAGE_TO_TILE_SUFFIX));
		assert_eq!(split_collection_name("wikiart"), ("wikiart", ""));
	}

	#[test]
	fn bare_suffix_is_a_dataset_name() {
		// A collection literally named like a suffix has no base to strip.
		assert_eq!(split_collection_name("_image_to_tile"), ("_image_to_tile", ""));
	}
}
