//! One tile of the zoom pyramid as stored and served.

use super::{LayoutExtent, Representative, Row, TileCoord, Value};
use crate::constants::{FIELD_DATA, FIELD_INDEX, FIELD_RANGE, FIELD_ZOOM_PLUS_TILE};
use anyhow::{Context, Result};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// A finalized tile: its coordinate, its representatives, and -- on the root
/// tile only -- the coordinate range of the whole corpus.
#[derive(Clone, Debug, PartialEq)]
pub struct TileRecord {
	pub coord: TileCoord,
	pub data: Vec<Representative>,
	pub range: Option<LayoutExtent>,
}

impl TileRecord {
	pub fn new(coord: TileCoord, data: Vec<Representative>, range: Option<LayoutExtent>) -> TileRecord {
		TileRecord { coord, data, range }
	}

	/// Storage form: `{index, zoom_plus_tile, data, range?}`.
	pub fn to_row(&self) -> Result<Row> {
		let mut row = Row::new()
			.with(FIELD_INDEX, Value::Int(self.coord.flat_index()))
			.with(FIELD_ZOOM_PLUS_TILE, Value::FloatVec(self.coord.as_vector().to_vec()))
			.with(
				FIELD_DATA,
				Value::Json(serde_json::to_value(&self.data).context("serializing tile representatives")?),
			);
		if let Some(range) = &self.range {
			row.set(
				FIELD_RANGE,
				Value::Json(serde_json::to_value(range).context("serializing tile range")?),
			);
		}
		Ok(row)
	}

	/// Reconstructs a tile from its stored row.
	pub fn from_row(row: &Row) -> Result<TileRecord> {
		let coord = TileCoord::from_vector(row.get_float_vec(FIELD_ZOOM_PLUS_TILE)?)
			.context("reading tile coordinate from row")?;
		let data: Vec<Representative> =
			serde_json::from_value(row.get_json(FIELD_DATA)?.clone()).context("parsing tile representatives")?;
		let range = match row.get_opt(FIELD_RANGE) {
			Some(value) => Some(
				serde_json::from_value(
					value
						.as_json()
						.with_context(|| format!("field '{FIELD_RANGE}' is {}, expected json", value.type_name()))?
						.clone(),
				)
				.context("parsing tile range")?,
			),
			None => None,
		};
		Ok(TileRecord { coord, data, range })
	}
}

/// Wire form mirrors the storage form, with `zoom_plus_tile` as integers.
impl Serialize for TileRecord {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let len = if self.range.is_some() { 4 } else { 3 };
		let mut state = serializer.serialize_struct("TileRecord", len)?;
		state.serialize_field(FIELD_INDEX, &self.coord.flat_index())?;
		state.serialize_field(
			FIELD_ZOOM_PLUS_TILE,
			&[i64::from(self.coord.z()), i64::from(self.coord.x()), i64::from(self.coord.y())],
		)?;
		state.serialize_field(FIELD_DATA, &self.data)?;
		if let Some(range) = &self.range {
			state.serialize_field(FIELD_RANGE, range)?;
		}
		state.end()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::ImageRecord;
	use pretty_assertions::assert_eq;

	fn sample() -> TileRecord {
		TileRecord::new(
			TileCoord::new(1, 0, 1).unwrap(),
			vec![Representative::new(
				ImageRecord {
					index: 4,
					path: "img/4.png".to_string(),
					x: 0.25,
					y: 0.75,
					width: 32,
					height: 64,
				},
				0,
				true,
			)],
			None,
		)
	}

	#[test]
	fn row_round_trips() {
		let tile = sample();
		let row = tile.to_row().unwrap();
		assert_eq!(row.get_int(FIELD_INDEX).unwrap(), tile.coord.flat_index());
		assert_eq!(TileRecord::from_row(&row).unwrap(), tile);
	}

	#[test]
	fn root_range_round_trips() {
		let mut tile = sample();
		tile.coord = TileCoord::root();
		tile.range = Some(LayoutExtent::new(0.0, 1.0, 0.0, 1.0).unwrap());
		let row = tile.to_row().unwrap();
		assert!(row.contains(FIELD_RANGE));
		assert_eq!(TileRecord::from_row(&row).unwrap(), tile);
	}

	#[test]
	fn wire_form_uses_integer_coordinates() {
		let json = serde_json::to_value(sample()).unwrap();
		assert_eq!(json["index"], serde_json::json!(2));
		assert_eq!(json["zoom_plus_tile"], serde_json::json!([1, 0, 1]));
		assert_eq!(json["data"][0]["in_previous"], serde_json::json!(true));
		assert!(json.get("range").is_none());
	}
}
