//! Request handlers and small response helpers.
//!
//! Query strings are parsed by hand because `indexes` is accepted both
//! repeated (`indexes=1&indexes=2`) and comma-separated (`indexes=1,2`).
//! Errors map onto the facade taxonomy: NotFound → 404, BadRequest → 400,
//! store errors → 505. CORS headers are left to the router's `CorsLayer`.

use crate::facade::QueryFacade;
use axum::{
	body::Body,
	extract::State,
	http::{header, Uri},
	response::Response,
};
use percent_encoding::percent_decode_str;
use semap_core::{QueryError, QueryResult};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
	pub facade: Arc<QueryFacade>,
}

// --- query-string helpers ----------------------------------------------------

fn decode(part: &str) -> String {
	percent_decode_str(&part.replace('+', " ")).decode_utf8_lossy().into_owned()
}

fn parse_query(uri: &Uri) -> Vec<(String, String)> {
	let Some(query) = uri.query() else {
		return Vec::new();
	};
	query
		.split('&')
		.filter(|pair| !pair.is_empty())
		.map(|pair| {
			let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
			(decode(key), decode(value))
		})
		.collect()
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> QueryResult<&'a str> {
	params
		.iter()
		.find(|(key, _)| key == name)
		.map(|(_, value)| value.as_str())
		.ok_or_else(|| QueryError::bad_request(format!("missing parameter '{name}'")))
}

fn int_param(params: &[(String, String)], name: &str) -> QueryResult<i64> {
	let raw = param(params, name)?;
	raw
		.parse()
		.map_err(|_| QueryError::bad_request(format!("parameter '{name}' is not an integer: '{raw}'")))
}

/// All values of `name`, each split on commas.
fn index_list(params: &[(String, String)], name: &str) -> QueryResult<Vec<i64>> {
	let mut indexes = Vec::new();
	let mut found = false;
	for (key, value) in params {
		if key != name {
			continue;
		}
		found = true;
		for part in value.split(',') {
			let part = part.trim();
			if part.is_empty() {
				continue;
			}
			indexes.push(
				part
					.parse()
					.map_err(|_| QueryError::bad_request(format!("parameter '{name}' has a non-integer entry: '{part}'")))?,
			);
		}
	}
	if !found {
		return Err(QueryError::bad_request(format!("missing parameter '{name}'")));
	}
	Ok(indexes)
}

// --- response helpers --------------------------------------------------------

fn ok_json<T: Serialize>(value: &T) -> Response<Body> {
	match serde_json::to_vec(value) {
		Ok(body) => Response::builder()
			.status(200)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body))
			.expect("failed to build OK response"),
		Err(err) => error_response(&QueryError::Store(anyhow::Error::new(err).context("serializing response"))),
	}
}

fn error_response(err: &QueryError) -> Response<Body> {
	let status: u16 = match err {
		QueryError::NotFound(_) => 404,
		QueryError::BadRequest(_) => 400,
		QueryError::Store(_) => 505,
	};
	Response::builder()
		.status(status)
		.header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
		.body(Body::from(err.to_string()))
		.expect("failed to build error response")
}

fn respond<T: Serialize>(what: &str, result: QueryResult<T>) -> Response<Body> {
	match result {
		Ok(value) => ok_json(&value),
		Err(err) => {
			match &err {
				QueryError::Store(cause) => log::warn!("{what} failed: {cause:#}"),
				other => log::debug!("{what}: {other}"),
			}
			error_response(&err)
		}
	}
}

// --- handlers ----------------------------------------------------------------

pub async fn collection_names(State(state): State<AppState>) -> Response<Body> {
	match state.facade.list_collections().await {
		Ok(collections) => ok_json(&serde_json::json!({ "collections": collections })),
		Err(err) => {
			log::warn!("listing collections failed: {err}");
			error_response(&err)
		}
	}
}

pub async fn collection_info(State(state): State<AppState>, uri: Uri) -> Response<Body> {
	let params = parse_query(&uri);
	let result = async {
		let collection = param(&params, "collection")?;
		state.facade.collection_info(collection).await
	}
	.await;
	respond("collection-info", result)
}

pub async fn image_text(State(state): State<AppState>, uri: Uri) -> Response<Body> {
	let params = parse_query(&uri);
	let result = async {
		let collection = param(&params, "collection")?;
		let text = param(&params, "text")?;
		state.facade.search_by_text(collection, text).await
	}
	.await;
	respond("image-text", result)
}

pub async fn tiles(State(state): State<AppState>, uri: Uri) -> Response<Body> {
	let params = parse_query(&uri);
	let result = async {
		let collection = param(&params, "collection")?;
		let indexes = index_list(&params, "indexes")?;
		state.facade.get_tiles(collection, &indexes).await
	}
	.await;
	respond("tiles", result)
}

pub async fn image_to_tile(State(state): State<AppState>, uri: Uri) -> Response<Body> {
	let params = parse_query(&uri);
	let result = async {
		let collection = param(&params, "collection")?;
		let index = int_param(&params, "index")?;
		state.facade.image_to_tile(collection, index).await
	}
	.await;
	respond("image-to-tile", result)
}

pub async fn images(State(state): State<AppState>, uri: Uri) -> Response<Body> {
	let params = parse_query(&uri);
	let result = async {
		let collection = param(&params, "collection")?;
		let indexes = index_list(&params, "indexes")?;
		state.facade.paths(collection, &indexes).await
	}
	.await;
	respond("images", result)
}

pub async fn neighbors(State(state): State<AppState>, uri: Uri) -> Response<Body> {
	let params = parse_query(&uri);
	let result = async {
		let collection = param(&params, "collection")?;
		let index = int_param(&params, "index")?;
		let k = int_param(&params, "k")?;
		if k < 1 {
			return Err(QueryError::bad_request(format!("parameter 'k' must be >= 1, got {k}")));
		}
		state.facade.neighbors(collection, index, k as usize).await
	}
	.await;
	respond("neighbors", result)
}

pub async fn first_tiles(State(state): State<AppState>, uri: Uri) -> Response<Body> {
	let params = parse_query(&uri);
	let result = async {
		let collection = param(&params, "collection")?;
		state.facade.first_tiles(collection).await
	}
	.await;
	respond("first-tiles", result)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_query_decodes_keys_and_values() {
		let uri: Uri = "/api/image-text?collection=art&text=blue+boat%21".parse().unwrap();
		let params = parse_query(&uri);
		assert_eq!(param(&params, "collection").unwrap(), "art");
		assert_eq!(param(&params, "text").unwrap(), "blue boat!");
		assert!(param(&params, "missing").is_err());
	}

	#[test]
	fn index_list_accepts_repeats_and_commas() {
		let uri: Uri = "/api/images?collection=art&indexes=1,2&indexes=3".parse().unwrap();
		let params = parse_query(&uri);
		assert_eq!(index_list(&params, "indexes").unwrap(), vec![1, 2, 3]);
	}

	#[test]
	fn index_list_rejects_junk() {
		let uri: Uri = "/api/tiles?collection=art&indexes=1,abc".parse().unwrap();
		let params = parse_query(&uri);
		match index_list(&params, "indexes") {
			Err(QueryError::BadRequest(msg)) => assert!(msg.contains("abc"), "{msg}"),
			other => panic!("expected BadRequest, got {other:?}"),
		}
	}

	#[test]
	fn error_statuses_follow_the_taxonomy() {
		assert_eq!(error_response(&QueryError::not_found("x")).status(), 404);
		assert_eq!(error_response(&QueryError::bad_request("x")).status(), 400);
		assert_eq!(error_response(&QueryError::Store(anyhow::anyhow!("x"))).status(), 505);
	}
}
