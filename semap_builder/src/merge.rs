//! Optional merge of near-duplicate representatives (`cluster-merge`
//! feature).
//!
//! After clustering an oversized tile, representatives whose 512-d
//! embeddings are nearly parallel add no visual information. This pass drops
//! a non-pinned representative when its cosine similarity to an already-kept
//! one reaches [`MERGE_THRESHOLD`]. Pinned representatives are never
//! dropped, so cross-level continuity is unaffected, and tiles at the
//! deepest level never reach this code because they skip clustering.

use anyhow::{Context, Result};
use semap_core::constants::{FIELD_EMBEDDING, FIELD_INDEX, MERGE_THRESHOLD};
use semap_core::ImageRecord;
use semap_store::{cosine_distance, VectorStore};
use std::collections::HashMap;

/// Filters `selected` (pairs of image and `in_previous`), dropping
/// non-pinned near-duplicates. Input order is preserved.
pub async fn merge_near_duplicates(
	store: &dyn VectorStore,
	dataset: &str,
	selected: Vec<(ImageRecord, bool)>,
) -> Result<Vec<(ImageRecord, bool)>> {
	if selected.len() < 2 {
		return Ok(selected);
	}

	let ids: Vec<i64> = selected.iter().map(|(image, _)| image.index).collect();
	let rows = store
		.query(dataset, &ids, &[FIELD_INDEX, FIELD_EMBEDDING])
		.await
		.context("fetching embeddings for the merge pass")?;
	let mut embeddings: HashMap<i64, Vec<f32>> = HashMap::with_capacity(rows.len());
	for row in &rows {
		embeddings.insert(row.get_int(FIELD_INDEX)?, row.get_float_vec(FIELD_EMBEDDING)?.to_vec());
	}

	let mut kept: Vec<(ImageRecord, bool)> = Vec::with_capacity(selected.len());
	for (image, in_previous) in selected {
		let duplicate = !in_previous
			&& embeddings.get(&image.index).is_some_and(|candidate| {
				kept.iter().any(|(kept_image, _)| {
					embeddings
						.get(&kept_image.index)
						.is_some_and(|other| 1.0 - cosine_distance(candidate, other) >= MERGE_THRESHOLD)
				})
			});
		if duplicate {
			log::debug!("merged representative {} into an earlier near-duplicate", image.index);
		} else {
			kept.push((image, in_previous));
		}
	}
	Ok(kept)
}
