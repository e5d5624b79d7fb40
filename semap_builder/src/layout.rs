//! Streaming the 2-D layout out of the embeddings collection.

use anyhow::{ensure, Context, Result};
use semap_core::constants::SEARCH_LIMIT;
use semap_core::ImageRecord;
use semap_store::VectorStore;

/// Loads `(index, path, x, y, width, height)` of every entity of `dataset`,
/// in primary-key batches of [`SEARCH_LIMIT`]. `early_stop` truncates the
/// corpus for debug runs.
///
/// Fails when any layout coordinate is non-finite: the `(x, y)` fields are
/// only valid once the low-dimensional projection has completed for the
/// whole corpus.
pub async fn load_layout(store: &dyn VectorStore, dataset: &str, early_stop: Option<usize>) -> Result<Vec<ImageRecord>> {
	ensure!(
		store.has_collection(dataset).await?,
		"embeddings collection '{dataset}' does not exist"
	);
	store
		.load_collection(dataset)
		.await
		.with_context(|| format!("loading embeddings collection '{dataset}'"))?;

	let total = usize::try_from(store.num_entities(dataset).await?).unwrap_or(0);
	let target = early_stop.map_or(total, |stop| stop.min(total));
	if target < total {
		log::info!("early stop: loading {target} of {total} entities of '{dataset}'");
	}

	let mut records = Vec::with_capacity(target);
	let mut start = 0usize;
	while start < target {
		let end = (start + SEARCH_LIMIT).min(target);
		let ids: Vec<i64> = (start as i64..end as i64).collect();
		let rows = store
			.query(dataset, &ids, &ImageRecord::FIELDS)
			.await
			.with_context(|| format!("querying entities {start}..{end} of '{dataset}'"))?;
		for row in &rows {
			let record = ImageRecord::from_row(row)?;
			ensure!(
				record.x.is_finite() && record.y.is_finite(),
				"layout coordinate of image {} is not finite -- has the 2-D projection completed?",
				record.index
			);
			records.push(record);
		}
		start = end;
	}

	// The primary keys are dense 0..N-1; anything else is a broken corpus.
	ensure!(
		records.len() == target,
		"expected {target} entities in '{dataset}', loaded {}",
		records.len()
	);
	Ok(records)
}
