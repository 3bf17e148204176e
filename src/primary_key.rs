use std::{collections::BTreeMap, fmt};

use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::field_set::CACHE_KEY_SEPARATOR;


/// A single primary key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PkValue {
    #[display("{0}")]
    Int(i64),
    #[display("{0}")]
    Str(String),
}

/// Primary key of a record: a single value or a compound key naming each of its parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    Scalar(PkValue),
    Compound(BTreeMap<String, PkValue>),
}

impl PrimaryKey {
    pub fn compound<I, K, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PkValue>,
    {
        Self::Compound(
            parts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub(crate) fn cache_key(&self) -> PkCacheKey {
        match self {
            Self::Scalar(value) => PkCacheKey::Scalar(value.clone()),
            Self::Compound(parts) => PkCacheKey::Compound(parts.clone()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => fmt::Display::fmt(value, f),
            Self::Compound(parts) => {
                write!(f, "{{")?;
                for (index, (name, value)) in parts.iter().enumerate() {
                    if index != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for PkValue {
                fn from(value: $t) -> Self {
                    PkValue::Int(value as i64)
                }
            }
            impl From<$t> for PrimaryKey {
                fn from(value: $t) -> Self {
                    PrimaryKey::Scalar(value.into())
                }
            }
        )*
    };
}
impl_from_int!(i32, i64, u32);

impl From<&str> for PkValue {
    fn from(value: &str) -> Self {
        PkValue::Str(value.to_owned())
    }
}
impl From<String> for PkValue {
    fn from(value: String) -> Self {
        PkValue::Str(value)
    }
}
impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey::Scalar(value.into())
    }
}
impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey::Scalar(value.into())
    }
}
impl From<PkValue> for PrimaryKey {
    fn from(value: PkValue) -> Self {
        PrimaryKey::Scalar(value)
    }
}
impl From<&PrimaryKey> for PrimaryKey {
    fn from(value: &PrimaryKey) -> Self {
        value.clone()
    }
}

/// Key into the per-record map of a cache.
///
/// Values keep their type, for scalar keys and for each part of a compound key, so that `5`
/// and `"5"` address different records. Parts are ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PkCacheKey {
    Scalar(PkValue),
    Compound(BTreeMap<String, PkValue>),
}

impl fmt::Display for PkCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => fmt::Display::fmt(value, f),
            Self::Compound(parts) => {
                for (index, (name, value)) in parts.iter().enumerate() {
                    if index != 0 {
                        write!(f, "{CACHE_KEY_SEPARATOR}")?;
                    }
                    write!(f, "{name}{CACHE_KEY_SEPARATOR}{value}")?;
                }
                Ok(())
            }
        }
    }
}
