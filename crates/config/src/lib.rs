//! Configuration loading, validation and env substitution.
//!
//! Config files: `commbridge.toml`, `commbridge.yaml`, or `commbridge.json`
//! Searched in `./` then `~/.config/commbridge/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        config_dir, discover_and_load, find_config_file, find_or_default_config_path, load_config,
        load_or_discover, write_default_config,
    },
    schema::{ActionsConfig, BridgeConfig, EngineConfig, ServerConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
