//! Shared vocabulary of the semap workspace: tile coordinates, layout
//! geometry, representative/tile records, vector-store value and schema
//! types, the query error taxonomy, and the text-encoder interface.

pub mod constants;
pub mod encoder;
pub mod error;
pub mod types;

pub use encoder::TextEncoder;
pub use error::{QueryError, QueryResult};
pub use types::*;
