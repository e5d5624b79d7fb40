//! Record and storage types shared across the workspace.

mod layout_extent;
mod representative;
mod schema;
mod tile_coord;
mod tile_record;
mod value;

pub use layout_extent::LayoutExtent;
pub use representative::{ImageRecord, Representative};
pub use schema::{clusters_schema, embeddings_schema, image_to_tile_schema, CollectionSchema, FieldKind, FieldSchema, Metric};
pub use tile_coord::TileCoord;
pub use tile_record::TileRecord;
pub use value::{Row, Value};
