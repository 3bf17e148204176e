//! In-memory cache of partially populated view-model records, keyed by primary key and by the
//! set of fields populated on each record, with change listeners.

mod cache;
mod error;
mod field_set;
mod model;
mod primary_key;
mod record;
mod record_cache;
mod subscription;

#[cfg(test)]
mod test_helpers;

pub use cache::*;
pub use error::*;
pub use field_set::*;
pub use model::*;
pub use primary_key::{PkValue, PrimaryKey};
pub use record::*;
pub use subscription::*;
