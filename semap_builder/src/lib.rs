//! Offline hierarchical tile & cluster builder.
//!
//! Consumes a finalized embeddings collection (512-d vectors projected to 2-D
//! layout coordinates) and produces the two derived collections the serving
//! path reads: the clusters collection (one row per tile of the zoom
//! pyramid) and the image-to-tile collection (the coarsest tile at which
//! each image first appears as a representative).
//!
//! The pipeline: load the layout, pick the pyramid depth, then walk the
//! levels coarse to fine, clustering each tile under the constraint that
//! representatives inherited from the parent tile stay representatives.

pub mod composite;
pub mod kmeans;
pub mod layout;
#[cfg(feature = "cluster-merge")]
pub mod merge;
pub mod pyramid;
pub mod tiling;

pub use kmeans::{ConstrainedKMeans, KMeansFit};
pub use pyramid::{BuildSummary, BuilderOptions, TileBuilder};
pub use tiling::Tiling;
