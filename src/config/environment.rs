//! Environment variable loading and management.
//!
//! The environment carries host-level overrides (listen address) and the
//! provider credentials that never belong in a checked-in TOML file.

use std::env;
use std::path::Path;

/// Loads environment variables from a `.env` file and the system
/// environment.
#[derive(Debug, Clone)]
pub struct EnvironmentLoader {
    #[allow(dead_code)]
    env_file: Option<String>,
}

impl EnvironmentLoader {
    /// Initialize the environment loader.
    ///
    /// # Arguments
    /// * `env_file` - Path to a `.env` file. Only loaded when an explicit
    ///   path is provided, so unit tests see unpolluted defaults.
    pub fn new(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            if path.exists() {
                if let Err(e) = dotenv::from_path(path) {
                    eprintln!("Warning: Failed to load .env file: {}", e);
                }
            }
        }

        Self {
            env_file: env_file.map(|p| p.to_string_lossy().to_string()),
        }
    }

    /// Listen host override from `TROUPE_HOST`.
    pub fn listen_host(&self) -> Option<String> {
        env::var("TROUPE_HOST").ok()
    }

    /// Listen port override from `TROUPE_PORT`.
    pub fn listen_port(&self) -> Option<u16> {
        env::var("TROUPE_PORT").ok().and_then(|raw| raw.parse().ok())
    }

    /// Provider endpoint override from `GENERATION_ENDPOINT`.
    pub fn generation_endpoint(&self) -> Option<String> {
        env::var("GENERATION_ENDPOINT").ok()
    }

    /// Provider API key from `GENERATION_API_KEY`.
    pub fn generation_api_key(&self) -> Option<String> {
        env::var("GENERATION_API_KEY").ok()
    }
}

impl Default for EnvironmentLoader {
    fn default() -> Self {
        Self::new(None)
    }
}
