// Point source implementations
pub mod source_trait;
pub mod memory_source;
pub mod file_source;

pub use source_trait::*;
pub use memory_source::*;
pub use file_source::*;
