//! Image records and tile representatives.

use super::Row;
use crate::constants::{FIELD_HEIGHT, FIELD_INDEX, FIELD_PATH, FIELD_WIDTH, FIELD_X, FIELD_Y};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// One image of the corpus as the serving path sees it: identity, location in
/// the 2-D layout, and the display metadata a client needs.
///
/// This is also the response shape of text search and neighbor queries, where
/// zoom bookkeeping has no meaning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
	pub index: i64,
	pub path: String,
	pub x: f32,
	pub y: f32,
	pub width: u32,
	pub height: u32,
}

impl ImageRecord {
	/// Reads the image fields out of a stored embeddings-collection row.
	pub fn from_row(row: &Row) -> Result<ImageRecord> {
		let index = row.get_int(FIELD_INDEX)?;
		let width = row.get_int(FIELD_WIDTH)?;
		let height = row.get_int(FIELD_HEIGHT)?;
		ensure!(width >= 0 && height >= 0, "image {index} has negative dimensions");
		Ok(ImageRecord {
			index,
			path: row.get_str(FIELD_PATH)?.to_string(),
			x: row.get_float(FIELD_X)?,
			y: row.get_float(FIELD_Y)?,
			width: width as u32,
			height: height as u32,
		})
	}

	/// The projection of [`ImageRecord::from_row`], for store queries.
	pub const FIELDS: [&'static str; 6] = [FIELD_INDEX, FIELD_PATH, FIELD_X, FIELD_Y, FIELD_WIDTH, FIELD_HEIGHT];
}

/// An image selected to stand for a cluster of images within one tile.
///
/// `zoom` is the coarsest level at which the image is a representative;
/// `in_previous` states whether it already represented the parent tile.
/// Serializes flat, i.e. as one JSON object with the image fields inline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Representative {
	#[serde(flatten)]
	pub image: ImageRecord,
	pub zoom: u8,
	pub in_previous: bool,
}

impl Representative {
	pub fn new(image: ImageRecord, zoom: u8, in_previous: bool) -> Representative {
		Representative { image, zoom, in_previous }
	}

	pub fn index(&self) -> i64 {
		self.image.index
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn sample() -> Representative {
		Representative::new(
			ImageRecord {
				index: 7,
				path: "img/0007.jpg".to_string(),
				x: 1.5,
				y: -2.0,
				width: 640,
				height: 480,
			},
			2,
			true,
		)
	}

	#[test]
	fn serializes_flat() {
		let json = serde_json::to_value(sample()).unwrap();
		assert_eq!(
			json,
			serde_json::json!({
				"index": 7,
				"path": "img/0007.jpg",
				"x": 1.5,
				"y": -2.0,
				"width": 640,
				"height": 480,
				"zoom": 2,
				"in_previous": true
			})
		);
	}

	#[test]
	fn deserializes_from_flat_json() {
		let rep: Representative = serde_json::from_value(serde_json::json!({
			"index": 7,
			"path": "img/0007.jpg",
			"x": 1.5,
			"y": -2.0,
			"width": 640,
			"height": 480,
			"zoom": 2,
			"in_previous": true
		}))
		.unwrap();
		assert_eq!(rep, sample());
	}
}
