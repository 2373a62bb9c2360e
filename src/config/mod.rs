// Configuration module for ops-pilot
// Engine parameters, their file/CLI layering and storage locations

#[allow(clippy::module_inception)]
pub mod config;
pub mod config_loader;

// Re-export main types for easier access
pub use config::EngineConfig;
pub use config_loader::{ConfigLoader, ConfigOverrides, StoragePaths};
