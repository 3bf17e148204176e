use std::{collections::BTreeSet, fmt};

#[cfg(test)]
mod tests;

/// Separator used to join multiple values into a single cache key, eg.
/// `["a", "b", "c"]` becomes `a⁞b⁞c`.
pub const CACHE_KEY_SEPARATOR: char = '⁞';

/// An order-independent set of field names.
///
/// Two sets built from the same names in any order (with or without
/// duplicates) are equal and produce the same canonical key.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldSet(BTreeSet<String>);

impl FieldSet {
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self(names.into_iter().map(|n| n.as_ref().to_owned()).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(|n| n.as_str())
    }

    /// Returns `true` if every name in `self` is also in `other`.
    pub fn is_subset(&self, other: &FieldSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Returns the names of `self` that are not in `other`.
    pub fn difference(&self, other: &FieldSet) -> FieldSet {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    /// Returns a copy of `self` without the names in `excluded`.
    ///
    /// Used to strip primary key field names, which are implicit in every cache key.
    pub fn without(&self, excluded: &FieldSet) -> FieldSet {
        self.difference(excluded)
    }

    pub fn union(&self, other: &FieldSet) -> FieldSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Canonical key: names sorted and joined with [`CACHE_KEY_SEPARATOR`].
    pub fn key(&self) -> String {
        self.to_string()
    }

    pub(crate) fn join(&self, sep: &str) -> String {
        self.iter().collect::<Vec<_>>().join(sep)
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, name) in self.0.iter().enumerate() {
            if index != 0 {
                write!(f, "{CACHE_KEY_SEPARATOR}")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}
impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl<S: AsRef<str>> FromIterator<S> for FieldSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
impl<'a> IntoIterator for &'a FieldSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
