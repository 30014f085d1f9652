#![deny(unsafe_code)]

use std::fmt;

use crate::EngineError;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), uuid::Uuid::new_v4().simple()))
            }

            /// Wraps an existing identifier, rejecting blank values.
            pub fn new(value: impl Into<String>) -> Result<Self, EngineError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(EngineError::InvalidInput(format!(
                        concat!("blank ", stringify!($name), ": '{}'"),
                        value
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

entity_id!(
    /// Identifies one execution of confirmed mappings.
    BatchId,
    "batch"
);
entity_id!(SnapshotId, "snap");
entity_id!(RetryId, "retry");
entity_id!(CandidateId, "dup");
entity_id!(RollbackId, "rb");
entity_id!(
    /// Identifies one review session in the mapping wizard.
    SessionId,
    "review"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = BatchId::generate();
        let b = BatchId::generate();
        assert!(a.as_str().starts_with("batch-"));
        assert_ne!(a, b);
    }

    #[test]
    fn blank_ids_are_rejected() {
        assert!(SnapshotId::new("  ").is_err());
        assert_eq!(SnapshotId::new(" snap-1 ").unwrap().as_str(), "snap-1");
    }
}
