//! Error taxonomy of the query facade.
//!
//! The offline builder reports failures through `anyhow` like the rest of the
//! workspace; the serving path needs a closed set of kinds because each maps
//! to a fixed HTTP status (`NotFound` → 404, `BadRequest` → 400, `Store` →
//! 505). Store errors keep their `anyhow` cause chain.

use std::fmt;

#[derive(Debug)]
pub enum QueryError {
	/// Unknown collection, unknown primary key, or no tile at the requested
	/// coordinate.
	NotFound(String),
	/// Malformed client input (indexes, parameters).
	BadRequest(String),
	/// Any error surfaced by the vector store.
	Store(anyhow::Error),
}

pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
	pub fn not_found(what: impl Into<String>) -> QueryError {
		QueryError::NotFound(what.into())
	}

	pub fn bad_request(what: impl Into<String>) -> QueryError {
		QueryError::BadRequest(what.into())
	}
}

impl fmt::Display for QueryError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			QueryError::NotFound(what) => write!(f, "not found: {what}"),
			QueryError::BadRequest(what) => write!(f, "bad request: {what}"),
			QueryError::Store(err) => write!(f, "vector store error: {err}"),
		}
	}
}

impl std::error::Error for QueryError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			QueryError::Store(err) => err.source(),
			_ => None,
		}
	}
}

impl From<anyhow::Error> for QueryError {
	fn from(err: anyhow::Error) -> QueryError {
		QueryError::Store(err)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::anyhow;

	#[test]
	fn display_includes_kind_and_cause() {
		assert_eq!(
			QueryError::not_found("collection 'x'").to_string(),
			"not found: collection 'x'"
		);
		assert_eq!(QueryError::bad_request("index 'a'").to_string(), "bad request: index 'a'");
		assert_eq!(
			QueryError::from(anyhow!("connection reset")).to_string(),
			"vector store error: connection reset"
		);
	}
}
