//! HTTP surface of the semantic map.
//!
//! Split the same way as the rest of the serving stack:
//! - `handlers` implement the concrete request handlers and response helpers.
//! - `routes` composes handlers into an Axum `Router` with CORS and a global
//!   in-flight limit.
//! - `map_server` owns lifecycle only: listening, graceful shutdown.

mod handlers;
mod map_server;
mod routes;

pub use map_server::MapServer;
pub use routes::build_router;
