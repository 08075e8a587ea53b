//! Shared types, error model, and configuration for contourkit.
//!
//! This crate is the foundation depended on by all other contourkit crates.
//! It provides:
//! - [`ContourError`], the unified error type
//! - Domain types ([`DatasetHandle`], [`SpatialReference`], [`LineType`], [`Tile`], [`Predicate`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, ContourConfig, EngineConfig, FootprintConfig, IndexConfig,
    PathsConfig, ProjectionConfig, ProjectionPolicy, SmoothingConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{ContourError, Result};
pub use types::{
    CoordinateSystem, DatasetHandle, FieldExpression, FieldSpec, FieldType, LengthUnit, LineType,
    Predicate, SpatialReference, Tile,
};
