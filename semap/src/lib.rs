//! # semap
//!
//! A backend for building and serving zoomable semantic maps of large image
//! collections. Images are embedded with a CLIP-style encoder, projected to
//! a 2-D layout, and precomputed into a hierarchical tile pyramid stored in
//! a vector database; this crate serves that pyramid to interactive clients
//! and hosts the command-line entry points.
//!
//! ## Crates
//! - [`semap_core`](semap_core) — shared record, coordinate and schema types
//! - [`semap_store`](semap_store) — vector-store trait, engines, lifecycle registry
//! - [`semap_builder`](semap_builder) — the offline tile & cluster builder
//! - this crate — query facade, HTTP server, configuration, CLI glue

pub mod config;
pub mod encoder;
pub mod facade;
pub mod server;

pub use semap_builder as builder;
pub use semap_core as core;
pub use semap_store as store;
