//! Debug PNG contact sheets of tile representatives.
//!
//! With `--images`, the builder renders one PNG per non-empty tile: the
//! representative images arranged on a square grid, named `z_x_y.png`. This
//! is a visual QA aid for the pyramid, not part of the served data.

use anyhow::{Context, Result};
use image::imageops;
use image::RgbaImage;
use semap_core::TileRecord;
use std::fs;
use std::path::Path;

/// Edge length of one thumbnail cell in the sheet.
pub const THUMBNAIL_SIZE: u32 = 128;

/// Renders contact sheets for `tiles` into `out_dir`, reading source images
/// relative to `image_root`. Unreadable source images are skipped with a
/// warning. Returns the number of sheets written.
pub fn write_tile_composites(tiles: &[TileRecord], image_root: &Path, out_dir: &Path) -> Result<usize> {
	fs::create_dir_all(out_dir).with_context(|| format!("creating {out_dir:?}"))?;
	let mut written = 0usize;
	for tile in tiles {
		if tile.data.is_empty() {
			continue;
		}
		let side = (tile.data.len() as f64).sqrt().ceil() as u32;
		let mut sheet = RgbaImage::new(side * THUMBNAIL_SIZE, side * THUMBNAIL_SIZE);

		for (slot, rep) in tile.data.iter().enumerate() {
			let path = image_root.join(&rep.image.path);
			let source = match image::open(&path) {
				Ok(img) => img,
				Err(err) => {
					log::warn!("skipping unreadable image {path:?}: {err}");
					continue;
				}
			};
			let thumb = imageops::thumbnail(&source.to_rgba8(), THUMBNAIL_SIZE, THUMBNAIL_SIZE);
			let (col, row) = (slot as u32 % side, slot as u32 / side);
			imageops::overlay(&mut sheet, &thumb, i64::from(col * THUMBNAIL_SIZE), i64::from(row * THUMBNAIL_SIZE));
		}

		let coord = tile.coord;
		let out_path = out_dir.join(format!("{}_{}_{}.png", coord.z(), coord.x(), coord.y()));
		sheet.save(&out_path).with_context(|| format!("writing {out_path:?}"))?;
		written += 1;
	}
	Ok(written)
}

#[cfg(test)]
mod tests {
	use super::*;
	use semap_core::{ImageRecord, Representative, TileCoord};

	fn representative(index: i64, path: &str) -> Representative {
		Representative::new(
			ImageRecord {
				index,
				path: path.to_string(),
				x: 0.0,
				y: 0.0,
				width: 8,
				height: 8,
			},
			0,
			false,
		)
	}

	#[test]
	fn writes_one_sheet_per_nonempty_tile() -> Result<()> {
		let root = tempfile::tempdir()?;
		let out = tempfile::tempdir()?;

		// Two tiny source images; one representative points at a missing file.
		RgbaImage::from_pixel(8, 8, image::Rgba([255, 0, 0, 255])).save(root.path().join("a.png"))?;
		RgbaImage::from_pixel(8, 8, image::Rgba([0, 255, 0, 255])).save(root.path().join("b.png"))?;

		let tiles = vec![
			TileRecord::new(
				TileCoord::root(),
				vec![
					representative(0, "a.png"),
					representative(1, "b.png"),
					representative(2, "missing.png"),
				],
				None,
			),
			TileRecord::new(TileCoord::new(1, 0, 0).unwrap(), Vec::new(), None),
		];

		let written = write_tile_composites(&tiles, root.path(), out.path())?;
		assert_eq!(written, 1);
		assert!(out.path().join("0_0_0.png").is_file());
		let sheet = image::open(out.path().join("0_0_0.png"))?.to_rgba8();
		// Three representatives need a 2x2 grid.
		assert_eq!(sheet.width(), 2 * THUMBNAIL_SIZE);
		Ok(())
	}
}
