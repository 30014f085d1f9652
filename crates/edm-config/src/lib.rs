#![deny(unsafe_code)]

//! Injected configuration: target schema declarations and engine settings.

pub mod engine;
pub mod error;
pub mod hash;
pub mod schema;

pub use crate::engine::{load_engine_config, load_engine_config_or_default, validate_engine_config};
pub use crate::error::ConfigError;
pub use crate::hash::sha256_hex;
pub use crate::schema::{
    SCHEMAS_ENV_VAR, SchemaCatalog, load_pinned_schema, load_target_schema, parse_target_schema,
    schemas_root,
};
