use thiserror::Error;

use crate::FieldKind;

/// Errors raised by records and schemas.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    /// Fields were requested from a record that was never given them.
    #[error("field(s) {fields} were not assigned on the record; available fields are {available}")]
    NotAssigned { fields: String, available: String },

    #[error("unknown field '{field}' for model {model}")]
    UnknownField { model: String, field: String },

    #[error("invalid value for field '{field}': expected {expected}")]
    InvalidValue { field: String, expected: FieldKind },

    #[error("missing value for primary key field '{field}'")]
    MissingPrimaryKey { field: String },

    #[error("primary key field '{field}' must be an integer or a string")]
    InvalidPrimaryKey { field: String },

    #[error("record data must be an object")]
    NotAnObject,

    #[error("invalid model schema: {message}")]
    Schema { message: String },
}

/// Errors raised by [`ViewModelCache`](crate::ViewModelCache) operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    #[error("record has no assigned fields; cannot be cached")]
    NoAssignedFields,

    #[error("model has a compound key of {fields}; a mapping of these fields to values must be provided")]
    CompoundKeyExpected { fields: String },

    #[error("model has a compound key of {fields}; missing value(s) for field(s) {missing}")]
    MissingKeyValues { fields: String, missing: String },

    #[error("model has a single primary key named '{field}' but a compound key was provided")]
    ScalarKeyExpected { field: String },

    #[error("attempted to cache a record of model {actual} in the cache for {expected}")]
    WrongModel { expected: String, actual: String },

    #[error("cache entry {key} points at {target} which is not cached")]
    DanglingPointer { key: String, target: String },

    #[error(transparent)]
    Field(#[from] FieldError),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
