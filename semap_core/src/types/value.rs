//! Field values and rows as exchanged with the vector store.
//!
//! A [`Row`] is an ordered field-name → [`Value`] map. The typed getters
//! return errors naming the offending field so read paths can use `?`
//! without re-wrapping every access.

use anyhow::{anyhow, bail, Result};
use std::collections::{btree_map, BTreeMap};

/// One stored field value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	Int(i64),
	Float(f32),
	Str(String),
	FloatVec(Vec<f32>),
	Json(serde_json::Value),
}

impl Value {
	pub fn type_name(&self) -> &'static str {
		match self {
			Value::Int(_) => "int",
			Value::Float(_) => "float",
			Value::Str(_) => "string",
			Value::FloatVec(_) => "float vector",
			Value::Json(_) => "json",
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(v) => Some(*v),
			_ => None,
		}
	}

	pub fn as_float(&self) -> Option<f32> {
		match self {
			Value::Float(v) => Some(*v),
			Value::Int(v) => Some(*v as f32),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_float_vec(&self) -> Option<&[f32]> {
		match self {
			Value::FloatVec(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_json(&self) -> Option<&serde_json::Value> {
		match self {
			Value::Json(v) => Some(v),
			_ => None,
		}
	}
}

/// One entity of a collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
	fields: BTreeMap<String, Value>,
}

impl Row {
	pub fn new() -> Row {
		Row::default()
	}

	/// Builder-style insert.
	pub fn with(mut self, name: impl Into<String>, value: Value) -> Row {
		self.fields.insert(name.into(), value);
		self
	}

	pub fn set(&mut self, name: impl Into<String>, value: Value) {
		self.fields.insert(name.into(), value);
	}

	pub fn contains(&self, name: &str) -> bool {
		self.fields.contains_key(name)
	}

	pub fn get(&self, name: &str) -> Result<&Value> {
		self
			.fields
			.get(name)
			.ok_or_else(|| anyhow!("row has no field '{name}'"))
	}

	pub fn get_opt(&self, name: &str) -> Option<&Value> {
		self.fields.get(name)
	}

	pub fn get_int(&self, name: &str) -> Result<i64> {
		match self.get(name)? {
			Value::Int(v) => Ok(*v),
			other => bail!("field '{name}' is {}, expected int", other.type_name()),
		}
	}

	pub fn get_float(&self, name: &str) -> Result<f32> {
		match self.get(name)? {
			Value::Float(v) => Ok(*v),
			Value::Int(v) => Ok(*v as f32),
			other => bail!("field '{name}' is {}, expected float", other.type_name()),
		}
	}

	pub fn get_str(&self, name: &str) -> Result<&str> {
		match self.get(name)? {
			Value::Str(v) => Ok(v),
			other => bail!("field '{name}' is {}, expected string", other.type_name()),
		}
	}

	pub fn get_float_vec(&self, name: &str) -> Result<&[f32]> {
		match self.get(name)? {
			Value::FloatVec(v) => Ok(v),
			other => bail!("field '{name}' is {}, expected float vector", other.type_name()),
		}
	}

	pub fn get_json(&self, name: &str) -> Result<&serde_json::Value> {
		match self.get(name)? {
			Value::Json(v) => Ok(v),
			other => bail!("field '{name}' is {}, expected json", other.type_name()),
		}
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
		self.fields.iter()
	}

	/// Copy of this row restricted to `names`; `["*"]` keeps everything.
	/// Missing fields are skipped, not errors -- optional fields like the
	/// root-tile range are simply absent on most rows.
	pub fn project(&self, names: &[&str]) -> Row {
		if names.contains(&"*") {
			return self.clone();
		}
		let mut out = Row::new();
		for name in names {
			if let Some(value) = self.fields.get(*name) {
				out.set(*name, value.clone());
			}
		}
		out
	}
}

impl<'a> IntoIterator for &'a Row {
	type Item = (&'a String, &'a Value);
	type IntoIter = btree_map::Iter<'a, String, Value>;

	fn into_iter(self) -> Self::IntoIter {
		self.fields.iter()
	}
}
