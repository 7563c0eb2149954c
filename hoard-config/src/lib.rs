//! Configuration loading for Hoard.
//!
//! Settings come from a TOML or JSON file, inline JSON, or built-in defaults,
//! with a couple of environment overrides applied last. Everything is
//! validated before the engine sees it.

#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, load_from_env, load_from_file, parse_from_str};
pub use models::{ConfigSource, DatabaseConfig, HoardConfig};
pub use validation::{ConfigValidationError, validate};
