pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigFormat, FleetConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
