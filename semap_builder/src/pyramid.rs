//! Level-by-level construction of the zoom pyramid.
//!
//! Levels are processed coarse to fine; within one level, tiles run
//! concurrently (they touch disjoint image-sets). Finalized tiles accumulate
//! in a resident pending set until `limit_for_insert` is reached; the spill
//! then flushes and evicts every level except the most recently completed
//! one, which in-flight tiles still need for parent lookups. Parents that
//! were evicted are re-fetched from the partially populated clusters
//! collection by an exact (distance 0) search on `zoom_plus_tile`.
//!
//! Any failure drops the partially built collections: the store never
//! exposes a partial pyramid.

use crate::kmeans::ConstrainedKMeans;
use crate::layout::load_layout;
use crate::tiling::Tiling;
use anyhow::{ensure, Context, Result};
use futures::{stream, StreamExt, TryStreamExt};
use semap_core::constants::{
	clusters_collection_name, image_to_tile_collection_name, FIELD_DATA, FIELD_INDEX, FIELD_ZOOM_PLUS_TILE,
	INSERT_SIZE, LIMIT_FOR_INSERT, MAX_PER_TILE, NUMBER_OF_CLUSTERS,
};
use semap_core::{clusters_schema, image_to_tile_schema, ImageRecord, LayoutExtent, Representative, Row, TileCoord, TileRecord, Value};
use semap_store::{ensure_absent, insert_chunked, VectorStore};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
pub struct BuilderOptions {
	pub dataset: String,
	/// Rows per insert batch.
	pub batch_size: usize,
	/// Drop and rebuild existing derived collections.
	pub repopulate: bool,
	/// Truncate the corpus to this many entities (debug runs).
	pub early_stop: Option<usize>,
	pub max_per_tile: usize,
	pub number_of_clusters: usize,
	/// Soft bound on resident, not-yet-flushed tiles.
	pub limit_for_insert: usize,
	/// Concurrent tile tasks within one level.
	pub concurrency: usize,
}

impl BuilderOptions {
	pub fn new(dataset: &str) -> BuilderOptions {
		BuilderOptions {
			dataset: dataset.to_string(),
			batch_size: INSERT_SIZE,
			repopulate: false,
			early_stop: None,
			max_per_tile: MAX_PER_TILE,
			number_of_clusters: NUMBER_OF_CLUSTERS,
			limit_for_insert: LIMIT_FOR_INSERT,
			concurrency: num_cpus::get().max(1),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildSummary {
	pub max_zoom: u8,
	pub tiles: i64,
	pub images: usize,
}

/// A finalized tile that has not been flushed yet.
struct PendingTile {
	reps: Vec<Representative>,
	range: Option<LayoutExtent>,
}

#[derive(Default)]
struct BuildState {
	pending: BTreeMap<TileCoord, PendingTile>,
	/// Coarsest tile at which each image became a representative.
	image_to_tile: BTreeMap<i64, TileCoord>,
	inserted: usize,
}

pub struct TileBuilder {
	store: Arc<dyn VectorStore>,
	options: BuilderOptions,
}

impl TileBuilder {
	pub fn new(store: Arc<dyn VectorStore>, options: BuilderOptions) -> TileBuilder {
		TileBuilder { store, options }
	}

	/// Builds the clusters and image-to-tile collections of the dataset.
	pub async fn build(&self) -> Result<BuildSummary> {
		let opts = &self.options;
		let clusters_name = clusters_collection_name(&opts.dataset);
		let image_to_tile_name = image_to_tile_collection_name(&opts.dataset);

		ensure!(
			self.store.has_collection(&opts.dataset).await?,
			"embeddings collection '{}' does not exist",
			opts.dataset
		);
		ensure!(
			ensure_absent(&*self.store, &clusters_name, opts.repopulate).await?,
			"collection '{clusters_name}' already exists; run with repopulate to rebuild it"
		);
		ensure!(
			ensure_absent(&*self.store, &image_to_tile_name, opts.repopulate).await?,
			"collection '{image_to_tile_name}' already exists; run with repopulate to rebuild it"
		);

		let records = load_layout(&*self.store, &opts.dataset, opts.early_stop).await?;
		let tiling = Tiling::build(&records, opts.max_per_tile)?;
		log::info!(
			"building pyramid for '{}': {} images, max zoom level {}",
			opts.dataset,
			records.len(),
			tiling.depth()
		);

		self.store.create_collection(clusters_schema(&opts.dataset)).await?;
		self
			.store
			.load_collection(&clusters_name)
			.await
			.context("loading the fresh clusters collection")?;

		let image_to_tile = match self.populate(&records, &tiling, &clusters_name).await {
			Ok(map) => map,
			Err(err) => {
				self.drop_partial(&[clusters_name.as_str()]).await;
				return Err(err).with_context(|| format!("building the zoom pyramid of '{}'", opts.dataset));
			}
		};

		let images = match self.write_image_to_tile(image_to_tile).await {
			Ok(images) => images,
			Err(err) => {
				// insert_chunked already rolled back the image-to-tile
				// collection; the pyramid is partial without it.
				self.drop_partial(&[clusters_name.as_str(), image_to_tile_name.as_str()]).await;
				return Err(err).with_context(|| format!("building the image-to-tile mapping of '{}'", opts.dataset));
			}
		};

		let summary = BuildSummary {
			max_zoom: tiling.depth(),
			tiles: TileCoord::pyramid_len(tiling.depth() + 1),
			images,
		};
		log::info!(
			"built '{}': {} tiles over {} levels, {} images mapped",
			opts.dataset,
			summary.tiles,
			summary.max_zoom + 1,
			summary.images
		);
		Ok(summary)
	}

	async fn populate(
		&self,
		records: &[ImageRecord],
		tiling: &Tiling,
		clusters_name: &str,
	) -> Result<BTreeMap<i64, TileCoord>> {
		let state = Mutex::new(BuildState::default());

		for z in 0..=tiling.depth() {
			let mut partition = tiling.level_partition(z);
			stream::iter(tiling.level_coords(z))
				.map(|coord| {
					let point_ids = partition.remove(&coord).unwrap_or_default();
					self.process_tile(coord, point_ids, records, tiling, clusters_name, &state)
				})
				.buffer_unordered(self.options.concurrency.max(1))
				.try_collect::<Vec<()>>()
				.await
				.with_context(|| format!("processing zoom level {z}"))?;
			log::info!("zoom level {z}/{} completed", tiling.depth());
		}

		let mut state = state.into_inner();
		let remaining = drain_flushable(&mut state.pending, None);
		state.inserted += self.flush_tiles(clusters_name, remaining).await?;

		let expected = TileCoord::pyramid_len(tiling.depth() + 1);
		ensure!(
			state.inserted as i64 == expected,
			"inserted {} tiles, expected {expected}",
			state.inserted
		);
		ensure!(
			state.image_to_tile.len() == records.len(),
			"image-to-tile covers {} of {} images",
			state.image_to_tile.len(),
			records.len()
		);
		Ok(state.image_to_tile)
	}

	async fn process_tile(
		&self,
		coord: TileCoord,
		point_ids: Vec<u32>,
		records: &[ImageRecord],
		tiling: &Tiling,
		clusters_name: &str,
		state: &Mutex<BuildState>,
	) -> Result<()> {
		// Spill first: earlier tiles may have pushed the resident set over
		// the limit. The level below the current one stays resident for
		// parent lookups. The lock is dropped before any store call.
		let flushable = {
			let mut state = state.lock().await;
			if state.pending.len() >= self.options.limit_for_insert {
				drain_flushable(&mut state.pending, coord.z().checked_sub(1))
			} else {
				Vec::new()
			}
		};
		if !flushable.is_empty() {
			let flushed = self.flush_tiles(clusters_name, flushable).await?;
			state.lock().await.inserted += flushed;
		}

		let entities: Vec<&ImageRecord> = point_ids.iter().map(|i| &records[*i as usize]).collect();

		let pinned = self.pinned_representatives(coord, &entities, clusters_name, state).await?;

		let selected: Vec<(ImageRecord, bool)> = if entities.len() <= self.options.max_per_tile {
			// Small tiles keep every image; merging here would lose images
			// from the deepest level.
			entities
				.iter()
				.map(|e| ((*e).clone(), pinned.iter().any(|p| p.index() == e.index)))
				.collect()
		} else {
			#[allow(unused_mut)]
			let mut selected = self.cluster_representatives(coord, &entities, &pinned)?;
			#[cfg(feature = "cluster-merge")]
			{
				selected = crate::merge::merge_near_duplicates(&*self.store, &self.options.dataset, selected).await?;
			}
			selected
		};

		ensure!(
			selected.len() <= self.options.max_per_tile,
			"tile {coord} has {} representatives, exceeding the bound of {}",
			selected.len(),
			self.options.max_per_tile
		);
		ensure!(
			selected.iter().filter(|(_, in_previous)| *in_previous).count() == pinned.len(),
			"representative continuity violated at tile {coord}: {} pinned, {} kept",
			pinned.len(),
			selected.iter().filter(|(_, in_previous)| *in_previous).count()
		);

		let mut state = state.lock().await;
		let mut reps = Vec::with_capacity(selected.len());
		for (image, in_previous) in selected {
			let zoom = match state.image_to_tile.get(&image.index) {
				Some(first) => first.z(),
				None => {
					state.image_to_tile.insert(image.index, coord);
					coord.z()
				}
			};
			reps.push(Representative::new(image, zoom, in_previous));
		}
		let range = (coord.z() == 0).then(|| tiling.extent());
		state.pending.insert(coord, PendingTile { reps, range });
		Ok(())
	}

	/// Representatives of the parent tile whose images fall into this tile.
	/// These are pinned: they must stay representatives here.
	async fn pinned_representatives(
		&self,
		coord: TileCoord,
		entities: &[&ImageRecord],
		clusters_name: &str,
		state: &Mutex<BuildState>,
	) -> Result<Vec<Representative>> {
		let Some(parent) = coord.parent() else {
			return Ok(Vec::new());
		};
		let resident = {
			let state = state.lock().await;
			state.pending.get(&parent).map(|tile| tile.reps.clone())
		};
		let parent_reps = match resident {
			Some(reps) => reps,
			None => self
				.fetch_tile(clusters_name, parent)
				.await
				.with_context(|| format!("re-fetching evicted parent tile {parent}"))?,
		};
		let in_tile: HashSet<i64> = entities.iter().map(|e| e.index).collect();
		Ok(
			parent_reps
				.into_iter()
				.filter(|rep| in_tile.contains(&rep.index()))
				.collect(),
		)
	}

	/// Reads one tile back from the clusters collection. A nearest-neighbor
	/// distance above zero means the tile was never written, which breaks
	/// the build's level ordering and is fatal.
	async fn fetch_tile(&self, clusters_name: &str, coord: TileCoord) -> Result<Vec<Representative>> {
		let vector = coord.as_vector();
		let fields = [FIELD_ZOOM_PLUS_TILE, FIELD_DATA];
		let hits = retry_once(&format!("searching tile {coord} in '{clusters_name}'"), || {
			self
				.store
				.search(clusters_name, FIELD_ZOOM_PLUS_TILE, &vector, 1, &fields)
		})
		.await?;
		let hit = hits
			.into_iter()
			.next()
			.with_context(|| format!("tile {coord} not found in '{clusters_name}'"))?;
		ensure!(
			hit.distance == 0.0,
			"tile {coord} not found in '{clusters_name}' (nearest tile at distance {})",
			hit.distance
		);
		serde_json::from_value(hit.row.get_json(FIELD_DATA)?.clone())
			.with_context(|| format!("parsing representatives of tile {coord}"))
	}

	/// Constrained clustering of an oversized tile. Pinned representatives
	/// keep their identity; every other cluster is represented by the member
	/// image closest to its center, ties broken by the lower image index.
	fn cluster_representatives(
		&self,
		coord: TileCoord,
		entities: &[&ImageRecord],
		pinned: &[Representative],
	) -> Result<Vec<(ImageRecord, bool)>> {
		let points: Vec<[f32; 2]> = entities.iter().map(|e| [e.x, e.y]).collect();
		let fixed: Vec<[f32; 2]> = pinned.iter().map(|r| [r.image.x, r.image.y]).collect();
		let k = self.options.number_of_clusters.min(points.len());
		ensure!(
			fixed.len() <= k,
			"tile {coord} pins {} representatives but clusters only {k}",
			fixed.len()
		);

		// Seeded by the tile's own index so reruns are reproducible.
		let fit = ConstrainedKMeans::new(k)
			.with_seed(coord.flat_index() as u64)
			.fit(&points, &fixed)
			.with_context(|| format!("clustering tile {coord}"))?;

		let mut counts = vec![0usize; k];
		let mut closest: Vec<Option<(f32, usize)>> = vec![None; k];
		for (i, (point, cluster)) in points.iter().zip(fit.labels.iter().copied()).enumerate() {
			counts[cluster] += 1;
			let dist = dist2(*point, fit.centers[cluster]);
			let better = match closest[cluster] {
				None => true,
				Some((best_dist, best_i)) => {
					dist < best_dist || (dist == best_dist && entities[i].index < entities[best_i].index)
				}
			};
			if better {
				closest[cluster] = Some((dist, i));
			}
		}
		ensure!(
			counts.iter().sum::<usize>() == entities.len(),
			"cluster assignment lost images at tile {coord}"
		);

		let mut selected = Vec::with_capacity(k);
		for (cluster, slot) in closest.iter().enumerate() {
			if cluster < pinned.len() {
				selected.push((pinned[cluster].image.clone(), true));
			} else if let Some((_, i)) = slot {
				selected.push((entities[*i].clone(), false));
			}
			// A free cluster can end up empty on duplicate-heavy tiles even
			// after re-seeding; it simply contributes no representative.
		}
		Ok(selected)
	}

	async fn flush_tiles(&self, clusters_name: &str, tiles: Vec<(TileCoord, PendingTile)>) -> Result<usize> {
		if tiles.is_empty() {
			return Ok(0);
		}
		let mut rows = Vec::with_capacity(tiles.len());
		for (coord, tile) in tiles {
			rows.push(TileRecord::new(coord, tile.reps, tile.range).to_row()?);
		}
		insert_chunked(&*self.store, clusters_name, rows, self.options.batch_size).await
	}

	async fn write_image_to_tile(&self, image_to_tile: BTreeMap<i64, TileCoord>) -> Result<usize> {
		self
			.store
			.create_collection(image_to_tile_schema(&self.options.dataset))
			.await?;
		let rows: Vec<Row> = image_to_tile
			.iter()
			.map(|(index, coord)| {
				Row::new()
					.with(FIELD_INDEX, Value::Int(*index))
					.with(FIELD_ZOOM_PLUS_TILE, Value::FloatVec(coord.as_vector().to_vec()))
			})
			.collect();
		let name = image_to_tile_collection_name(&self.options.dataset);
		insert_chunked(&*self.store, &name, rows, self.options.batch_size).await
	}

	/// Best-effort removal of partially built collections.
	async fn drop_partial(&self, names: &[&str]) {
		for name in names {
			match self.store.has_collection(name).await {
				Ok(true) => {
					log::warn!("dropping partially built collection '{name}'");
					if let Err(err) = self.store.drop_collection(name).await {
						log::error!("dropping '{name}' failed: {err:#}");
					}
				}
				Ok(false) => {}
				Err(err) => log::error!("checking for '{name}' failed: {err:#}"),
			}
		}
	}
}

fn dist2(a: [f32; 2], b: [f32; 2]) -> f32 {
	let dx = a[0] - b[0];
	let dy = a[1] - b[1];
	dx * dx + dy * dy
}

/// Removes every pending tile except those on `keep_level`.
fn drain_flushable(
	pending: &mut BTreeMap<TileCoord, PendingTile>,
	keep_level: Option<u8>,
) -> Vec<(TileCoord, PendingTile)> {
	let flush_keys: Vec<TileCoord> = pending
		.keys()
		.filter(|coord| keep_level != Some(coord.z()))
		.copied()
		.collect();
	flush_keys
		.into_iter()
		.map(|key| {
			let tile = pending.remove(&key).unwrap();
			(key, tile)
		})
		.collect()
}

/// Transient store hiccups during the build are retried once, then fatal.
async fn retry_once<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	match op().await {
		Ok(value) => Ok(value),
		Err(err) => {
			log::warn!("{what} failed, retrying once: {err:#}");
			op().await.with_context(|| format!("{what} (after one retry)"))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pending(reps: Vec<Representative>) -> PendingTile {
		PendingTile { reps, range: None }
	}

	#[test]
	fn drain_keeps_only_the_protected_level() {
		let mut map = BTreeMap::new();
		map.insert(TileCoord::root(), pending(Vec::new()));
		map.insert(TileCoord::new(1, 0, 0).unwrap(), pending(Vec::new()));
		map.insert(TileCoord::new(1, 1, 1).unwrap(), pending(Vec::new()));
		map.insert(TileCoord::new(2, 0, 0).unwrap(), pending(Vec::new()));

		let drained = drain_flushable(&mut map, Some(1));
		assert_eq!(drained.len(), 2);
		assert_eq!(map.len(), 2);
		assert!(map.keys().all(|c| c.z() == 1));

		let rest = drain_flushable(&mut map, None);
		assert_eq!(rest.len(), 2);
		assert!(map.is_empty());
	}

	#[tokio::test]
	async fn retry_once_recovers_from_a_single_failure() {
		let mut attempts = 0;
		let result = retry_once("flaky op", || {
			attempts += 1;
			let fail = attempts == 1;
			async move {
				if fail {
					anyhow::bail!("transient")
				}
				Ok(42)
			}
		})
		.await;
		assert_eq!(result.unwrap(), 42);
		assert_eq!(attempts, 2);
	}

	#[tokio::test]
	async fn retry_once_gives_up_after_the_second_failure() {
		let result: Result<()> = retry_once("always broken", || async { anyhow::bail!("nope") }).await;
		let err = result.unwrap_err().to_string();
		assert!(err.contains("after one retry"), "{err}");
	}
}
