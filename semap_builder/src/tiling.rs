//! Depth selection and the leaf grid.
//!
//! The pyramid depth `Z` is the smallest zoom at which the uniform
//! `2^Z × 2^Z` grid over the layout's bounding box holds at most
//! `max_per_tile` images per cell. The grid is kept sparse: only each
//! point's leaf cell is stored, and a level's tiles are derived by shifting
//! the leaf coordinates, so skewed layouts that need a deep grid cost memory
//! proportional to the corpus, not to `4^Z`.

use anyhow::{bail, ensure, Result};
use semap_core::{ImageRecord, LayoutExtent, TileCoord};
use std::collections::{BTreeMap, HashMap};

/// Deepest grid the builder will try.
const MAX_DEPTH: u8 = 12;

pub struct Tiling {
	extent: LayoutExtent,
	depth: u8,
	/// Leaf cell of each point, parallel to the input records.
	leaf: Vec<(u32, u32)>,
}

impl Tiling {
	/// Assigns every point to its leaf cell, increasing the depth until
	/// every cell respects `max_per_tile`.
	pub fn build(points: &[ImageRecord], max_per_tile: usize) -> Result<Tiling> {
		ensure!(!points.is_empty(), "cannot tile an empty layout");
		ensure!(max_per_tile >= 1, "max_per_tile must be >= 1");
		let extent = LayoutExtent::from_points(points.iter().map(|p| (p.x, p.y)))?;

		for depth in 0..=MAX_DEPTH {
			let mut counts: HashMap<(u32, u32), usize> = HashMap::new();
			let mut fullest = 0usize;
			for point in points {
				let cell = extent.tile_at(point.x, point.y, depth);
				let count = counts.entry(cell).or_insert(0);
				*count += 1;
				fullest = fullest.max(*count);
			}
			if fullest <= max_per_tile {
				log::debug!("tiling: depth {depth}, fullest leaf holds {fullest}/{max_per_tile}");
				let leaf = points.iter().map(|p| extent.tile_at(p.x, p.y, depth)).collect();
				return Ok(Tiling { extent, depth, leaf });
			}
		}
		bail!(
			"no grid up to depth {MAX_DEPTH} respects {max_per_tile} images per tile; \
			 the layout is too concentrated"
		)
	}

	pub fn extent(&self) -> LayoutExtent {
		self.extent
	}

	/// The maximum zoom level `Z`.
	pub fn depth(&self) -> u8 {
		self.depth
	}

	/// All tile coordinates of one level.
	pub fn level_coords(&self, z: u8) -> Vec<TileCoord> {
		assert!(z <= self.depth, "level {z} is below the leaf grid");
		let side = 1u32 << z;
		let mut coords = Vec::with_capacity((side as usize) * (side as usize));
		for x in 0..side {
			for y in 0..side {
				coords.push(TileCoord::new(z, x, y).unwrap());
			}
		}
		coords
	}

	/// Point indexes of every non-empty tile of one level, each list in
	/// input (ascending index) order. One O(n) pass per level.
	pub fn level_partition(&self, z: u8) -> BTreeMap<TileCoord, Vec<u32>> {
		assert!(z <= self.depth, "level {z} is below the leaf grid");
		let shift = self.depth - z;
		let mut partition: BTreeMap<TileCoord, Vec<u32>> = BTreeMap::new();
		for (i, (cx, cy)) in self.leaf.iter().enumerate() {
			let coord = TileCoord::new(z, cx >> shift, cy >> shift).unwrap();
			partition.entry(coord).or_default().push(i as u32);
		}
		partition
	}

	/// Point indexes of a single tile: the points whose leaf cells fall into
	/// the `2^(Z−z)`-square block the tile covers.
	pub fn tile_points(&self, coord: TileCoord) -> Vec<u32> {
		assert!(coord.z() <= self.depth, "tile {coord} is below the leaf grid");
		let shift = self.depth - coord.z();
		self
			.leaf
			.iter()
			.enumerate()
			.filter(|(_, (cx, cy))| (cx >> shift, cy >> shift) == (coord.x(), coord.y()))
			.map(|(i, _)| i as u32)
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(index: i64, x: f32, y: f32) -> ImageRecord {
		ImageRecord {
			index,
			path: format!("{index}.jpg"),
			x,
			y,
			width: 10,
			height: 10,
		}
	}

	#[test]
	fn five_points_fit_in_the_root() {
		// Scenario E1's layout.
		let points: Vec<ImageRecord> = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0), (0.5, 0.5)]
			.iter()
			.enumerate()
			.map(|(i, (x, y))| record(i as i64, *x, *y))
			.collect();
		let tiling = Tiling::build(&points, 30).unwrap();
		assert_eq!(tiling.depth(), 0);
		assert_eq!(tiling.extent(), LayoutExtent::new(0.0, 1.0, 0.0, 1.0).unwrap());
		assert_eq!(tiling.tile_points(TileCoord::root()).len(), 5);
	}

	#[test]
	fn crowding_forces_a_split() {
		// 61 points in the unit square cannot fit one tile of 30.
		let points: Vec<ImageRecord> = (0..61)
			.map(|i| record(i, (i % 8) as f32 / 7.0, (i / 8) as f32 / 7.0))
			.collect();
		let tiling = Tiling::build(&points, 30).unwrap();
		assert!(tiling.depth() >= 1);
		for coord in tiling.level_coords(tiling.depth()) {
			assert!(tiling.tile_points(coord).len() <= 30);
		}
	}

	#[test]
	fn partitions_cover_every_point_exactly_once() {
		let points: Vec<ImageRecord> = (0..200)
			.map(|i| record(i, (i * 37 % 101) as f32, (i * 53 % 97) as f32))
			.collect();
		let tiling = Tiling::build(&points, 10).unwrap();

		for z in 0..=tiling.depth() {
			let mut seen: Vec<u32> = tiling.level_partition(z).into_values().flatten().collect();
			seen.sort_unstable();
			let expected: Vec<u32> = (0..200).collect();
			assert_eq!(seen, expected, "level {z} does not partition the points");
		}
	}

	#[test]
	fn partition_agrees_with_tile_points() {
		let points: Vec<ImageRecord> = (0..120)
			.map(|i| record(i, (i * 29 % 89) as f32, (i * 31 % 83) as f32))
			.collect();
		let tiling = Tiling::build(&points, 8).unwrap();
		assert!(tiling.depth() >= 1);

		let z = tiling.depth() - 1;
		let partition = tiling.level_partition(z);
		for coord in tiling.level_coords(z) {
			let expected = tiling.tile_points(coord);
			let got = partition.get(&coord).cloned().unwrap_or_default();
			assert_eq!(got, expected, "partition of {coord} disagrees");
		}
	}

	#[test]
	fn children_partition_their_parent() {
		let points: Vec<ImageRecord> = (0..120)
			.map(|i| record(i, (i * 29 % 89) as f32, (i * 31 % 83) as f32))
			.collect();
		let tiling = Tiling::build(&points, 8).unwrap();
		assert!(tiling.depth() >= 1);

		for coord in tiling.level_coords(tiling.depth() - 1) {
			let mut from_children: Vec<u32> = coord.children().iter().flat_map(|c| tiling.tile_points(*c)).collect();
			let mut own = tiling.tile_points(coord);
			from_children.sort_unstable();
			own.sort_unstable();
			assert_eq!(own, from_children, "children of {coord} lose or duplicate points");
		}
	}

	#[test]
	fn identical_points_exceeding_the_bound_fail() {
		let points: Vec<ImageRecord> = (0..5).map(|i| record(i, 1.0, 1.0)).collect();
		assert!(Tiling::build(&points, 2).is_err());
	}
}
