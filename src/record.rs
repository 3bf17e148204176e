use crate::{FieldError, FieldSet, PrimaryKey};

/// A partially populated record that can be stored in a [`ViewModelCache`](crate::ViewModelCache).
///
/// Records are immutable once constructed. The cache never changes a record in place;
/// it stores the record or a clone restricted to a subset of its fields.
pub trait Record: Sized + 'static {
    /// Primary key identifying the record.
    fn pk(&self) -> PrimaryKey;

    /// Names of the fields populated on this instance, including primary key fields.
    fn assigned_fields(&self) -> &FieldSet;

    /// Creates a new record containing only `fields`.
    ///
    /// Primary key fields must always be carried over, whether or not `fields` names them.
    /// Fails if any of `fields` is not assigned on `self`.
    fn clone_fields(&self, fields: &FieldSet) -> Result<Self, FieldError>;

    /// Deep value comparison, including the set of assigned fields.
    fn is_equal(&self, other: &Self) -> bool;

    /// Name of the model this record belongs to.
    ///
    /// A cache created with [`ViewModelCache::for_model`](crate::ViewModelCache::for_model)
    /// rejects records that name a different model.
    fn model_name(&self) -> Option<&str> {
        None
    }
}
