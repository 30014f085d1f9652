//! Value normalization for migrated data.
//!
//! - **datetime**: date and date-time parsing, ISO 8601 output
//! - **phone**: E.164 normalization and digit-level comparison
//! - **email**: address validation and domain-aware comparison
//! - **identifiers**: NPI checksum and SSN structure
//! - **numeric** / **boolean** / **text**: scalar parsing and name handling
//! - **coerce**: semantic-type coercion used by the executor

pub mod boolean;
pub mod coerce;
pub mod datetime;
pub mod email;
pub mod identifiers;
pub mod numeric;
pub mod phone;
pub mod text;

pub use coerce::{check_required, is_canonical, transform_value, TransformOutcome, ValidationFailure};
