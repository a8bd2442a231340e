// Core engine components
pub mod distance;
pub mod predicate;
pub mod join_planner;
pub mod candidate_generator;
pub mod join_executor;
pub mod aggregator;
pub mod engine;

pub use distance::*;
pub use predicate::*;
pub use join_planner::*;
pub use candidate_generator::*;
pub use join_executor::*;
pub use aggregator::*;
pub use engine::*;
