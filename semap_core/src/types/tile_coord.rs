//! Tile coordinates in the zoom pyramid and their dense index mapping.
//!
//! A tile is identified by `(zoom, x, y)` with `x, y < 2^zoom`. Tiles of all
//! levels share one dense primary-key space: level `z` starts at
//! `Σ 4^i for i < z` and is laid out row-major by `x`. This lets both the
//! clusters collection and `first_tiles` be addressed by contiguous
//! primary-key ranges.
//!
//! # Examples
//!
//! ```
//! use semap_core::TileCoord;
//!
//! let root = TileCoord::root();
//! assert_eq!(root.flat_index(), 0);
//!
//! let coord = TileCoord::new(2, 3, 1).unwrap();
//! assert_eq!(coord.flat_index(), 1 + 4 + 4 * 3 + 1);
//! assert_eq!(TileCoord::from_flat_index(coord.flat_index()).unwrap(), coord);
//! assert_eq!(coord.parent().unwrap(), TileCoord::new(1, 1, 0).unwrap());
//! ```

use anyhow::{ensure, Result};
use std::fmt;

/// Maximum zoom level representable in the dense i64 index space.
const MAX_ZOOM: u8 = 30;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TileCoord {
	z: u8,
	x: u32,
	y: u32,
}

impl TileCoord {
	pub fn new(z: u8, x: u32, y: u32) -> Result<TileCoord> {
		ensure!(z <= MAX_ZOOM, "zoom {z} must be <= {MAX_ZOOM}");
		let side = 1u32 << z;
		ensure!(x < side, "tile x {x} must be < {side} at zoom {z}");
		ensure!(y < side, "tile y {y} must be < {side} at zoom {z}");
		Ok(TileCoord { z, x, y })
	}

	/// The single tile of level 0.
	pub fn root() -> TileCoord {
		TileCoord { z: 0, x: 0, y: 0 }
	}

	pub fn z(&self) -> u8 {
		self.z
	}

	pub fn x(&self) -> u32 {
		self.x
	}

	pub fn y(&self) -> u32 {
		self.y
	}

	/// Number of tiles per axis at this tile's level.
	pub fn side(&self) -> u32 {
		1u32 << self.z
	}

	/// The containing tile at level `z - 1`, `None` for the root.
	pub fn parent(&self) -> Option<TileCoord> {
		if self.z == 0 {
			return None;
		}
		Some(TileCoord {
			z: self.z - 1,
			x: self.x / 2,
			y: self.y / 2,
		})
	}

	/// The four tiles covering this tile at level `z + 1`.
	pub fn children(&self) -> [TileCoord; 4] {
		let (z, x, y) = (self.z + 1, self.x * 2, self.y * 2);
		[
			TileCoord { z, x, y },
			TileCoord { z, x, y: y + 1 },
			TileCoord { z, x: x + 1, y },
			TileCoord { z, x: x + 1, y: y + 1 },
		]
	}

	/// Number of tiles in a single level.
	pub fn level_len(z: u8) -> i64 {
		1i64 << (2 * u32::from(z))
	}

	/// Number of tiles in the complete pyramid of `levels` levels, i.e.
	/// `Σ 4^i for i in 0..levels`.
	pub fn pyramid_len(levels: u8) -> i64 {
		((1i64 << (2 * u32::from(levels))) - 1) / 3
	}

	/// Dense primary key of this tile: all coarser levels first, then
	/// row-major by `x` within the level.
	pub fn flat_index(&self) -> i64 {
		TileCoord::pyramid_len(self.z) + i64::from(self.side()) * i64::from(self.x) + i64::from(self.y)
	}

	/// Inverse of [`TileCoord::flat_index`].
	pub fn from_flat_index(index: i64) -> Result<TileCoord> {
		ensure!(index >= 0, "tile index {index} must be >= 0");
		let mut z = 0u8;
		while TileCoord::pyramid_len(z + 1) <= index {
			z += 1;
			ensure!(z <= MAX_ZOOM, "tile index {index} exceeds zoom {MAX_ZOOM}");
		}
		let rem = index - TileCoord::pyramid_len(z);
		let side = i64::from(1u32 << z);
		TileCoord::new(z, (rem / side) as u32, (rem % side) as u32)
	}

	/// The `[zoom, x, y]` form stored in the 3-d `zoom_plus_tile` field.
	pub fn as_vector(&self) -> [f32; 3] {
		[f32::from(self.z), self.x as f32, self.y as f32]
	}

	/// Reconstructs a coordinate from a stored `zoom_plus_tile` vector.
	pub fn from_vector(v: &[f32]) -> Result<TileCoord> {
		ensure!(v.len() == 3, "zoom_plus_tile must have 3 components, got {}", v.len());
		let as_int = |value: f32, what: &str| -> Result<i64> {
			let rounded = value.round();
			ensure!(
				(value - rounded).abs() < 1e-3 && rounded >= 0.0,
				"{what} component {value} is not a non-negative integer"
			);
			Ok(rounded as i64)
		};
		let z = as_int(v[0], "zoom")?;
		ensure!(z <= i64::from(MAX_ZOOM), "zoom {z} must be <= {MAX_ZOOM}");
		TileCoord::new(z as u8, as_int(v[1], "tile x")? as u32, as_int(v[2], "tile y")? as u32)
	}
}

impl fmt::Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("TileCoord({}, {}, {})", self.z, self.x, self.y))
	}
}

impl fmt::Display for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("{}/{}/{}", self.z, self.x, self.y))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_validates_bounds() {
		assert!(TileCoord::new(0, 0, 0).is_ok());
		assert!(TileCoord::new(0, 1, 0).is_err());
		assert!(TileCoord::new(3, 7, 7).is_ok());
		assert!(TileCoord::new(3, 8, 0).is_err());
		assert!(TileCoord::new(31, 0, 0).is_err());
	}

	#[test]
	fn pyramid_len_is_prefix_sum_of_level_len() {
		let mut sum = 0;
		for z in 0..10 {
			assert_eq!(TileCoord::pyramid_len(z), sum);
			sum += TileCoord::level_len(z);
		}
		// The first 8 levels make up the first-tiles prefix.
		assert_eq!(TileCoord::pyramid_len(8), 21845);
	}

	#[test]
	fn flat_index_round_trips() {
		for index in 0..TileCoord::pyramid_len(5) {
			let coord = TileCoord::from_flat_index(index).unwrap();
			assert_eq!(coord.flat_index(), index);
		}
	}

	#[test]
	fn flat_index_matches_reference_formula() {
		// index = sum(4^i for i < z) + 2^z * x + y
		let coord = TileCoord::new(3, 5, 2).unwrap();
		assert_eq!(coord.flat_index(), (1 + 4 + 16) + 8 * 5 + 2);
	}

	#[test]
	fn parent_and_children_are_inverse() {
		let coord = TileCoord::new(4, 11, 6).unwrap();
		for child in coord.children() {
			assert_eq!(child.parent().unwrap(), coord);
		}
		assert_eq!(TileCoord::root().parent(), None);
	}

	#[test]
	fn vector_round_trips_and_rejects_junk() {
		let coord = TileCoord::new(6, 63, 0).unwrap();
		assert_eq!(TileCoord::from_vector(&coord.as_vector()).unwrap(), coord);
		assert!(TileCoord::from_vector(&[1.0, 0.5, 0.0]).is_err());
		assert!(TileCoord::from_vector(&[1.0, -1.0, 0.0]).is_err());
		assert!(TileCoord::from_vector(&[1.0, 0.0]).is_err());
		// Out-of-grid vectors are rejected, not clamped.
		assert!(TileCoord::from_vector(&[1.0, 2.0, 0.0]).is_err());
	}

	#[test]
	fn ordering_is_by_level_first() {
		let a = TileCoord::new(1, 1, 1).unwrap();
		let b = TileCoord::new(2, 0, 0).unwrap();
		assert!(a < b);
	}
}
