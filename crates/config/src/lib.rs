//! Configuration loading, validation, and env substitution.
//!
//! Config files: `catmandu.toml`, `catmandu.yaml`, or `catmandu.json`
//! Searched in `./` then `~/.config/catmandu/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{AccumulatorConfig, CatmanduConfig, ChatLogConfig, HandlersConfig, RetryConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
