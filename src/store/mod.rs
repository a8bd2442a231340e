pub mod attribute_catalog;
pub mod dataset;
pub mod partition_index;
pub mod point_store;
pub mod spatial_index;

pub use attribute_catalog::*;
pub use dataset::*;
pub use partition_index::*;
pub use point_store::*;
pub use spatial_index::*;
