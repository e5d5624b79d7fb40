use anyhow::{Context, Result};
use semap_builder::{composite, BuilderOptions, TileBuilder};
use semap_core::constants::{clusters_collection_name, INSERT_SIZE, SEARCH_LIMIT};
use semap_core::TileRecord;
use semap_store::open_store;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// Database URI: "memory:" or a directory path.
	#[arg(long, display_order = 0)]
	pub database: String,

	/// Dataset name: the embeddings collection to build the pyramid from.
	#[arg(long, display_order = 0)]
	pub collection: String,

	/// Rows per insert batch.
	#[arg(long, default_value_t = INSERT_SIZE, display_order = 1)]
	pub batch_size: usize,

	/// Drop and rebuild existing derived collections.
	#[arg(long, display_order = 1)]
	pub repopulate: bool,

	/// Only process the first N entities; -1 disables.
	#[arg(long, default_value_t = -1, allow_hyphen_values = true, display_order = 1)]
	pub early_stop: i64,

	/// Write debug PNG composites of each tile's representatives.
	#[arg(long, display_order = 2)]
	pub images: bool,

	/// Source image root, required by --images.
	#[arg(long, value_name = "DIR", display_order = 2)]
	pub directory: Option<PathBuf>,
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	let store = open_store(&arguments.database)?;

	let mut options = BuilderOptions::new(&arguments.collection);
	options.batch_size = arguments.batch_size.max(1);
	options.repopulate = arguments.repopulate;
	options.early_stop = usize::try_from(arguments.early_stop).ok();

	let summary = TileBuilder::new(Arc::clone(&store), options).build().await?;
	log::info!(
		"done: {} tiles over {} zoom levels, {} images",
		summary.tiles,
		summary.max_zoom + 1,
		summary.images
	);

	if arguments.images {
		let directory = arguments
			.directory
			.as_ref()
			.context("--images requires --directory <source image root>")?;
		let clusters = clusters_collection_name(&arguments.collection);
		store.load_collection(&clusters).await?;

		let mut tiles = Vec::new();
		let mut start = 0i64;
		while start < summary.tiles {
			let end = (start + SEARCH_LIMIT as i64).min(summary.tiles);
			let ids: Vec<i64> = (start..end).collect();
			for row in &store.query(&clusters, &ids, &["*"]).await? {
				tiles.push(TileRecord::from_row(row)?);
			}
			start = end;
		}

		let out_dir = PathBuf::from(format!("composites_{}", arguments.collection));
		let written = composite::write_tile_composites(&tiles, directory, &out_dir)?;
		log::info!("wrote {written} tile composites to {out_dir:?}");
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::tests::run_command;

	#[test]
	fn build_requires_arguments() {
		let err = run_command(vec!["semap", "build"]).unwrap_err().to_string();
		assert!(err.contains("--database") || err.contains("Usage"), "{err}");
	}

	#[test]
	fn missing_embeddings_collection_fails() {
		let err = run_command(vec![
			"semap",
			"build",
			"--database",
			"memory:",
			"--collection",
			"nope",
		])
		.unwrap_err()
		.to_string();
		assert!(err.contains("does not exist"), "{err}");
	}
}
