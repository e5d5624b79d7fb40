//! Axis-aligned extent of the 2-D layout and the grid assignment formula.

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

/// Bounding box of layout coordinates. Also the `range` JSON stored on the
/// root tile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutExtent {
	pub x_min: f32,
	pub x_max: f32,
	pub y_min: f32,
	pub y_max: f32,
}

impl LayoutExtent {
	pub fn new(x_min: f32, x_max: f32, y_min: f32, y_max: f32) -> Result<LayoutExtent> {
		for v in [x_min, x_max, y_min, y_max] {
			ensure!(v.is_finite(), "extent bound {v} must be finite");
		}
		ensure!(x_min <= x_max, "x_min {x_min} must be <= x_max {x_max}");
		ensure!(y_min <= y_max, "y_min {y_min} must be <= y_max {y_max}");
		Ok(LayoutExtent { x_min, x_max, y_min, y_max })
	}

	/// Smallest extent covering all `(x, y)` pairs. Fails on an empty input.
	pub fn from_points<I: IntoIterator<Item = (f32, f32)>>(points: I) -> Result<LayoutExtent> {
		let mut iter = points.into_iter();
		let Some((x, y)) = iter.next() else {
			bail!("cannot compute the extent of an empty layout");
		};
		let mut extent = LayoutExtent::new(x, x, y, y)?;
		for (x, y) in iter {
			extent.include(x, y);
		}
		Ok(extent)
	}

	pub fn include(&mut self, x: f32, y: f32) {
		self.x_min = self.x_min.min(x);
		self.x_max = self.x_max.max(x);
		self.y_min = self.y_min.min(y);
		self.y_max = self.y_max.max(y);
	}

	pub fn contains(&self, x: f32, y: f32) -> bool {
		x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
	}

	/// Grid cell of `(x, y)` on the uniform `2^z × 2^z` grid over this
	/// extent: `min(⌊(v − min)·2^z / span⌋, 2^z − 1)` per axis. A degenerate
	/// axis (zero span) maps every point to cell 0.
	pub fn tile_at(&self, x: f32, y: f32, z: u8) -> (u32, u32) {
		let side = 1u32 << z;
		let cell = |value: f32, min: f32, max: f32| -> u32 {
			let span = f64::from(max) - f64::from(min);
			if span <= 0.0 {
				return 0;
			}
			let raw = ((f64::from(value) - f64::from(min)) * f64::from(side) / span).floor();
			(raw as u32).min(side - 1)
		};
		(cell(x, self.x_min, self.x_max), cell(y, self.y_min, self.y_max))
	}
}
