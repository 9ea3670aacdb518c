pub mod config;
pub mod error;
pub mod models;

pub use config::{Concurrency, HarvestConfig, PlatformConfig, PlatformSettings, RawPlatform};
pub use error::HarvestError;

pub type Result<T> = std::result::Result<T, HarvestError>;
