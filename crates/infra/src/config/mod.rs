//! Configuration loading and management
//!
//! This module provides utilities for loading the core configuration
//! from environment variables and files.

pub mod loader;
pub mod settings;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, load_from_lookup, probe_config_paths, LoadError};
pub use settings::CoreConfig;
