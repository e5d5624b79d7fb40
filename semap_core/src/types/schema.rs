//! Collection schemas: field kinds, metrics, and the three collection
//! families of a dataset.
//!
//! All vector fields use a FLAT (exact) index; the collections involved are
//! small enough that approximate indexes would only cost correctness.

use super::{Row, Value};
use crate::constants::{
	clusters_collection_name, image_to_tile_collection_name, EMBEDDING_DIM, FIELD_DATA, FIELD_EMBEDDING, FIELD_HEIGHT,
	FIELD_INDEX, FIELD_PATH, FIELD_RANGE, FIELD_WIDTH, FIELD_X, FIELD_Y, FIELD_ZOOM_PLUS_TILE, TILE_VECTOR_DIM,
};
use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

/// Distance metric of a vector field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
	Cosine,
	L2,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
	Int64,
	Float,
	VarChar,
	Json,
	FloatVector { dim: usize, metric: Metric },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
	pub name: String,
	pub kind: FieldKind,
	pub primary: bool,
	/// Optional fields may be absent from a row (e.g. the root-tile range).
	pub optional: bool,
}

impl FieldSchema {
	pub fn primary_int64(name: &str) -> FieldSchema {
		FieldSchema {
			name: name.to_string(),
			kind: FieldKind::Int64,
			primary: true,
			optional: false,
		}
	}

	pub fn int64(name: &str) -> FieldSchema {
		FieldSchema {
			name: name.to_string(),
			kind: FieldKind::Int64,
			primary: false,
			optional: false,
		}
	}

	pub fn float(name: &str) -> FieldSchema {
		FieldSchema {
			name: name.to_string(),
			kind: FieldKind::Float,
			primary: false,
			optional: false,
		}
	}

	pub fn varchar(name: &str) -> FieldSchema {
		FieldSchema {
			name: name.to_string(),
			kind: FieldKind::VarChar,
			primary: false,
			optional: false,
		}
	}

	pub fn json(name: &str) -> FieldSchema {
		FieldSchema {
			name: name.to_string(),
			kind: FieldKind::Json,
			primary: false,
			optional: false,
		}
	}

	pub fn optional_json(name: &str) -> FieldSchema {
		FieldSchema {
			name: name.to_string(),
			kind: FieldKind::Json,
			primary: false,
			optional: true,
		}
	}

	pub fn float_vector(name: &str, dim: usize, metric: Metric) -> FieldSchema {
		FieldSchema {
			name: name.to_string(),
			kind: FieldKind::FloatVector { dim, metric },
			primary: false,
			optional: false,
		}
	}

	fn accepts(&self, value: &Value) -> bool {
		match (&self.kind, value) {
			(FieldKind::Int64, Value::Int(_)) => true,
			(FieldKind::Float, Value::Float(_) | Value::Int(_)) => true,
			(FieldKind::VarChar, Value::Str(_)) => true,
			(FieldKind::Json, Value::Json(_)) => true,
			(FieldKind::FloatVector { dim, .. }, Value::FloatVec(v)) => v.len() == *dim,
			_ => false,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
	pub name: String,
	pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
	pub fn new(name: &str, fields: Vec<FieldSchema>) -> Result<CollectionSchema> {
		ensure!(!name.is_empty(), "collection name must not be empty");
		let primaries = fields.iter().filter(|f| f.primary).count();
		ensure!(primaries == 1, "schema '{name}' must have exactly one primary key, has {primaries}");
		let primary = fields.iter().find(|f| f.primary).unwrap();
		ensure!(
			primary.kind == FieldKind::Int64,
			"primary key '{}' of '{name}' must be int64",
			primary.name
		);
		for (i, field) in fields.iter().enumerate() {
			if fields[..i].iter().any(|f| f.name == field.name) {
				bail!("schema '{name}' declares field '{}' twice", field.name);
			}
		}
		Ok(CollectionSchema {
			name: name.to_string(),
			fields,
		})
	}

	pub fn primary_field(&self) -> &FieldSchema {
		self.fields.iter().find(|f| f.primary).unwrap()
	}

	pub fn field(&self, name: &str) -> Option<&FieldSchema> {
		self.fields.iter().find(|f| f.name == name)
	}

	/// Metric of the vector field `name`.
	pub fn vector_metric(&self, name: &str) -> Result<Metric> {
		match self.field(name) {
			Some(FieldSchema {
				kind: FieldKind::FloatVector { metric, .. },
				..
			}) => Ok(*metric),
			Some(_) => bail!("field '{name}' of '{}' is not a vector field", self.name),
			None => bail!("collection '{}' has no field '{name}'", self.name),
		}
	}

	/// Checks that `row` carries every non-optional schema field with a
	/// compatible value. Extra fields are allowed: collections carry
	/// dataset-specific attributes next to the declared ones.
	pub fn validate_row(&self, row: &Row) -> Result<()> {
		for field in &self.fields {
			match row.get_opt(&field.name) {
				Some(value) => ensure!(
					field.accepts(value),
					"field '{}' of '{}' does not accept a {} value",
					field.name,
					self.name,
					value.type_name()
				),
				None => ensure!(
					field.optional,
					"row for '{}' is missing required field '{}'",
					self.name,
					field.name
				),
			}
		}
		Ok(())
	}

	/// Primary-key value of `row`.
	pub fn primary_key(&self, row: &Row) -> Result<i64> {
		row.get_int(&self.primary_field().name)
	}
}

/// Schema of the embeddings collection of a dataset: cosine-indexed 512-d
/// embeddings plus the 2-D layout and display metadata.
pub fn embeddings_schema(dataset: &str) -> CollectionSchema {
	CollectionSchema::new(
		dataset,
		vec![
			FieldSchema::primary_int64(FIELD_INDEX),
			FieldSchema::float_vector(FIELD_EMBEDDING, EMBEDDING_DIM, Metric::Cosine),
			FieldSchema::float(FIELD_X),
			FieldSchema::float(FIELD_Y),
			FieldSchema::varchar(FIELD_PATH),
			FieldSchema::int64(FIELD_WIDTH),
			FieldSchema::int64(FIELD_HEIGHT),
		],
	)
	.unwrap()
}

/// Schema of the clusters collection: one row per tile of the zoom pyramid.
pub fn clusters_schema(dataset: &str) -> CollectionSchema {
	CollectionSchema::new(
		&clusters_collection_name(dataset),
		vec![
			FieldSchema::primary_int64(FIELD_INDEX),
			FieldSchema::float_vector(FIELD_ZOOM_PLUS_TILE, TILE_VECTOR_DIM, Metric::L2),
			FieldSchema::json(FIELD_DATA),
			FieldSchema::optional_json(FIELD_RANGE),
		],
	)
	.unwrap()
}

/// Schema of the image-to-tile collection: the coarsest tile per image.
pub fn image_to_tile_schema(dataset: &str) -> CollectionSchema {
	CollectionSchema::new(
		&image_to_tile_collection_name(dataset),
		vec![
			FieldSchema::primary_int64(FIELD_INDEX),
			FieldSchema::float_vector(FIELD_ZOOM_PLUS_TILE, TILE_VECTOR_DIM, Metric::L2),
		],
	)
	.unwrap()
}
