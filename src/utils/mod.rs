// Utility modules
pub mod error;
pub mod config;
pub mod types;
pub mod request;
pub mod telemetry;

pub use error::*;
pub use config::*;
pub use types::*;
pub use request::*;
pub use telemetry::*;
