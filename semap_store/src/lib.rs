//! Storage layer of the semap workspace.
//!
//! The vector store itself is an external system; everything here talks to it
//! through the [`VectorStore`] trait. Two engines are provided: an exact
//! in-memory engine (tests, `memory:` URIs) and a directory-backed engine
//! that persists collections as JSON lines. On top of the trait sit the
//! chunked persistence pipeline with rollback and the collection lifecycle
//! registry used by the serving path.

mod directory;
mod getters;
mod insert;
mod memory;
mod registry;
mod store;

pub use directory::DirectoryStore;
pub use getters::open_store;
pub use insert::{ensure_absent, insert_chunked};
pub use memory::MemoryStore;
pub use registry::{CollectionHandle, CollectionRegistry, DatasetInfo};
pub use store::{cosine_distance, l2_squared, SearchHit, VectorStore};
