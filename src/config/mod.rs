//! Configuration management for the workflow server.
//!
//! This module provides configuration loading through TOML files and
//! environment variable management via `.env` files.
//!
//! # Example
//!
//! ```no_run
//! use troupe::config::{ConfigurationLoader, EnvironmentLoader};
//! use std::path::Path;
//!
//! // Load environment variables
//! let env = EnvironmentLoader::new(None);
//!
//! // Load configuration from TOML
//! let loader = ConfigurationLoader::new(Some(Path::new("troupe.toml"))).unwrap();
//! let config = &loader.config;
//!
//! // Access configuration
//! println!("Max steps: {}", config.workflow.max_steps);
//! println!("Listen host override: {:?}", env.listen_host());
//! ```

pub mod config;
pub mod environment;

// Re-export main types for convenience
pub use self::config::{
    Configuration, ConfigurationLoader, GenerationConfig, LoggingConfig, ServerConfig,
    WorkflowConfig,
};
pub use self::environment::EnvironmentLoader;
