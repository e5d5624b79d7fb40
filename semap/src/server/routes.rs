//! Router composition: the `/api` surface, CORS, and a global in-flight cap.

use super::handlers::{self, AppState};
use crate::facade::QueryFacade;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};

/// Upper bound on concurrently handled requests.
const MAX_IN_FLIGHT: usize = 1024;

pub fn build_router(facade: Arc<QueryFacade>) -> Router {
	let state = AppState { facade };
	Router::new()
		.route("/api/collection-names", get(handlers::collection_names))
		.route("/api/collection-info", get(handlers::collection_info))
		.route("/api/image-text", get(handlers::image_text))
		.route("/api/tiles", get(handlers::tiles))
		.route("/api/image-to-tile", get(handlers::image_to_tile))
		.route("/api/images", get(handlers::images))
		.route("/api/neighbors", get(handlers::neighbors))
		.route("/api/first-tiles", get(handlers::first_tiles))
		.with_state(state)
		.layer(cors_layer())
		.layer(GlobalConcurrencyLimitLayer::new(MAX_IN_FLIGHT))
}

/// The map is a public read-only API: any origin may call it.
fn cors_layer() -> CorsLayer {
	CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}
