//! crudkit core types: field descriptors, field sets and select items.
//!
//! Everything here is plain data plus pure helpers. Async collaborators live
//! in `crudkit_api`; rendering and decoration build on these types.

#![forbid(unsafe_code)]

pub mod columns;
pub mod config;
pub mod field;
pub mod field_set;
pub mod merge;
pub mod select;
pub mod value;

pub use config::EngineConfig;
pub use field::{
    Accessible, Association, AssociationBinding, FieldDescriptor, FieldOptions, FieldType,
    ForeignOpt, VisibilityRule,
};
pub use field_set::{FieldChange, FieldSet};
pub use select::{enum_items, unique_items, DedupKey, SelectItem};

/// Errors raised while building or updating field sets.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("duplicate field name: {0}")]
    DuplicateField(String),
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("invalid options for field {field}: {source}")]
    InvalidOptions {
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

pub mod prelude {
    pub use super::{
        unique_items, Accessible, CoreError, CoreResult, EngineConfig, FieldChange,
        FieldDescriptor, FieldOptions, FieldSet, FieldType, SelectItem,
    };
}
