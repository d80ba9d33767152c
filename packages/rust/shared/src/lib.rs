//! Shared types, error model, and configuration for Curio.
//!
//! This crate is the foundation depended on by all other Curio crates.
//! It provides:
//! - [`CurioError`] — the unified error type
//! - Domain types ([`SourceItem`], [`OutputRecord`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CollectionApiConfig, DefaultsConfig, EmbeddingConfig, IndexConfig, RetryConfig,
    RunConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{CurioError, Result};
pub use types::{OutputRecord, SourceItem};
