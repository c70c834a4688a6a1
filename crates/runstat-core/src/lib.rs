pub mod config;
pub mod error;
pub mod types;

pub use config::RunstatConfig;
pub use error::{ConfigResult, ConfigurationError};
pub use types::*;
