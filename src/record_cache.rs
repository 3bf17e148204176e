use std::{collections::HashMap, rc::Rc};

use derive_ex::Ex;
use tracing::trace;

use crate::{CacheError, FieldSet, Record, Result};


pub(crate) type ChangeListener<T> = dyn Fn(Option<&Rc<T>>, Option<&Rc<T>>);

/// Value stored for one field set of a record.
pub(crate) enum Slot<T> {
    Concrete(Rc<T>),
    /// Refers to the slot of a superset of these fields. Cloned down to these fields when read.
    Pointer {
        target: FieldSet,
        /// The concrete value this pointer replaced. Returned instead of the clone when equal
        /// so that reference identity survives writes that do not change these fields.
        previous: Option<Rc<T>>,
    },
}

struct ListenerEntry<T> {
    id: u64,
    f: Rc<ChangeListener<T>>,
}

/// Listeners to call for one change, copied out of the cache so that they can be called
/// after the cache is released.
pub(crate) struct Notification<T> {
    listeners: Vec<Rc<ChangeListener<T>>>,
    previous: Option<Rc<T>>,
    next: Option<Rc<T>>,
}
impl<T> Notification<T> {
    pub fn dispatch(&self) {
        for f in &self.listeners {
            f(self.previous.as_ref(), self.next.as_ref());
        }
    }
}

#[derive(Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
pub(crate) struct Changes<T> {
    pub notifications: Vec<Notification<T>>,
    pub changed: bool,
}
impl<T> Changes<T> {
    pub fn new() -> Self {
        Self {
            notifications: Vec::new(),
            changed: false,
        }
    }
}

/// Cache for a single record as identified by its primary key.
///
/// Every field set that was written or read gets a slot. Writing a record updates the slots
/// of all subsets of its fields by pointing them at the new record; the pointers are only
/// cloned down to their own fields when read or when someone listens to them.
///
/// `latest` remembers the write order of each field set so that a read of a field set that
/// has no slot yet can be served from the most recently written superset.
pub(crate) struct RecordCache<T> {
    slots: HashMap<FieldSet, Slot<T>>,
    latest: HashMap<FieldSet, u64>,
    listeners: HashMap<FieldSet, Vec<ListenerEntry<T>>>,
    counter: u64,
}

impl<T: Record> RecordCache<T> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            latest: HashMap::new(),
            listeners: HashMap::new(),
            counter: 0,
        }
    }

    /// Adds `record`, whose non primary key fields are `key`.
    pub fn add(&mut self, record: &Rc<T>, key: FieldSet) -> Result<Changes<T>> {
        self.latest.insert(key.clone(), self.counter);
        self.counter += 1;

        let mut changes = Changes::new();
        let assigned = record.assigned_fields();
        let mut subsets: Vec<FieldSet> = self
            .slots
            .keys()
            .chain(self.listeners.keys())
            .filter(|k| **k != key && k.is_subset(assigned))
            .cloned()
            .collect();
        subsets.sort();
        subsets.dedup();

        for subset in subsets {
            if self.is_listened(&subset) {
                let previous = self.materialize(&subset)?;
                let next = restrict(record, &subset, previous.clone())?;
                if previous.as_ref().is_some_and(|p| Rc::ptr_eq(p, &next)) {
                    continue;
                }
                self.slots
                    .insert(subset.clone(), Slot::Concrete(next.clone()));
                changes.changed = true;
                self.push_notification(&mut changes, &subset, previous, Some(next));
            } else {
                let previous = match self.slots.remove(&subset) {
                    Some(Slot::Concrete(r)) => Some(r),
                    Some(Slot::Pointer { previous, .. }) => previous,
                    None => None,
                };
                trace!(fields = %subset, target = %key, "pointer installed");
                self.slots.insert(
                    subset,
                    Slot::Pointer {
                        target: key.clone(),
                        previous,
                    },
                );
                changes.changed = true;
            }
        }

        let previous = self.materialize(&key)?;
        let unchanged = previous
            .as_ref()
            .is_some_and(|p| Rc::ptr_eq(p, record) || p.is_equal(record));
        if !unchanged {
            self.slots
                .insert(key.clone(), Slot::Concrete(record.clone()));
            changes.changed = true;
            self.push_notification(&mut changes, &key, previous, Some(record.clone()));
        }
        Ok(changes)
    }

    /// Returns the record for exactly `fields`, cloning it from a superset if required.
    ///
    /// Listeners on `fields` are told about a value derived from a superset through `changes`,
    /// since their last known value is absent.
    pub fn get(&mut self, fields: &FieldSet, changes: &mut Changes<T>) -> Result<Option<Rc<T>>> {
        if self.slots.contains_key(fields) {
            return self.materialize(fields);
        }
        let Some(source) = self.latest_superset(fields)? else {
            return Ok(None);
        };
        let record = {
            let source = self.source(&source)?.ok_or_else(|| dangling(fields, &source))?;
            restrict(source, fields, None)?
        };
        self.slots
            .insert(fields.clone(), Slot::Concrete(record.clone()));
        self.push_notification(changes, fields, None, Some(record.clone()));
        Ok(Some(record))
    }

    /// Removes the slot for `fields`, or every slot if `fields` is `None`.
    ///
    /// `changed` of the result is `true` if anything was removed.
    pub fn delete(&mut self, fields: Option<&FieldSet>) -> Result<Changes<T>> {
        let mut changes = Changes::new();
        let Some(key) = fields else {
            let mut keys: Vec<FieldSet> = self.slots.keys().cloned().collect();
            keys.sort();
            let mut removed = Vec::new();
            for key in keys {
                let previous = if self.is_listened(&key) {
                    self.materialize(&key)?
                } else {
                    None
                };
                removed.push((key, previous));
            }
            self.slots.clear();
            self.latest.clear();
            for (key, previous) in removed {
                changes.changed = true;
                if previous.is_some() {
                    self.push_notification(&mut changes, &key, previous, None);
                }
            }
            return Ok(changes);
        };

        if !self.slots.contains_key(key) {
            return Ok(changes);
        }
        let previous = if self.is_listened(key) {
            self.materialize(key)?
        } else {
            None
        };
        self.slots.remove(key);
        self.latest.remove(key);
        changes.changed = true;
        if previous.is_some() {
            self.push_notification(&mut changes, key, previous, None);
        }
        self.repoint_dependents(key)?;
        Ok(changes)
    }

    /// Registers `f` for changes to exactly `fields`.
    ///
    /// The slot is resolved first so that the listener sees the value it was registered against
    /// as `previous` of the first change.
    pub fn add_listener(
        &mut self,
        fields: &FieldSet,
        id: u64,
        f: Rc<ChangeListener<T>>,
        changes: &mut Changes<T>,
    ) -> Result<()> {
        self.get(fields, changes)?;
        self.listeners
            .entry(fields.clone())
            .or_default()
            .push(ListenerEntry { id, f });
        Ok(())
    }

    pub fn remove_listener(&mut self, fields: &FieldSet, id: u64) -> bool {
        let Some(listeners) = self.listeners.get_mut(fields) else {
            return false;
        };
        let len = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() != len;
        if listeners.is_empty() {
            self.listeners.remove(fields);
        }
        removed
    }

    fn is_listened(&self, fields: &FieldSet) -> bool {
        self.listeners.get(fields).is_some_and(|l| !l.is_empty())
    }

    fn push_notification(
        &self,
        changes: &mut Changes<T>,
        fields: &FieldSet,
        previous: Option<Rc<T>>,
        next: Option<Rc<T>>,
    ) {
        if let Some(listeners) = self.listeners.get(fields) {
            if !listeners.is_empty() {
                changes.notifications.push(Notification {
                    listeners: listeners.iter().map(|l| l.f.clone()).collect(),
                    previous,
                    next,
                });
            }
        }
    }

    /// Turns the slot for `fields` into a concrete value and returns it.
    fn materialize(&mut self, fields: &FieldSet) -> Result<Option<Rc<T>>> {
        let previous = match self.slots.get(fields) {
            None => return Ok(None),
            Some(Slot::Concrete(record)) => return Ok(Some(record.clone())),
            Some(Slot::Pointer { previous, .. }) => previous.clone(),
        };
        let record = {
            let source = self
                .source(fields)?
                .ok_or_else(|| dangling(fields, fields))?;
            restrict(source, fields, previous)?
        };
        self.slots
            .insert(fields.clone(), Slot::Concrete(record.clone()));
        Ok(Some(record))
    }

    /// The concrete record stored at `fields`, following pointers.
    fn source<'a>(&'a self, fields: &'a FieldSet) -> Result<Option<&'a Rc<T>>> {
        let mut current = fields;
        for _ in 0..=self.slots.len() {
            match self.slots.get(current) {
                None if current == fields => return Ok(None),
                None => break,
                Some(Slot::Concrete(record)) => return Ok(Some(record)),
                Some(Slot::Pointer { target, .. }) => current = target,
            }
        }
        Err(dangling(fields, current))
    }

    /// The most recently written field set whose record has all of `fields`.
    fn latest_superset(&self, fields: &FieldSet) -> Result<Option<FieldSet>> {
        let mut order: Vec<(&FieldSet, u64)> = self.latest.iter().map(|(k, v)| (k, *v)).collect();
        order.sort_by(|a, b| b.1.cmp(&a.1));
        for (key, _) in order {
            if let Some(source) = self.source(key)? {
                if fields.is_subset(source.assigned_fields()) {
                    return Ok(Some(key.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Repoints every pointer that (transitively) depended on the removed slot `removed` at
    /// the most recent remaining superset, dropping it if there is none.
    fn repoint_dependents(&mut self, removed: &FieldSet) -> Result<()> {
        let mut removed_keys = vec![removed.clone()];
        let mut dependents = Vec::new();
        while let Some(removed) = removed_keys.pop() {
            let pointing: Vec<FieldSet> = self
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Pointer { target, .. } if *target == removed))
                .map(|(k, _)| k.clone())
                .collect();
            for key in pointing {
                if let Some(Slot::Pointer { previous, .. }) = self.slots.remove(&key) {
                    self.latest.remove(&key);
                    removed_keys.push(key.clone());
                    dependents.push((key, previous));
                }
            }
        }
        dependents.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, previous) in dependents {
            match self.latest_superset(&key)? {
                Some(target) => {
                    trace!(fields = %key, target = %target, "pointer moved");
                    self.slots.insert(key, Slot::Pointer { target, previous });
                }
                None => {
                    trace!(fields = %key, "pointer dropped");
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn is_pointer(&self, fields: &FieldSet) -> bool {
        matches!(self.slots.get(fields), Some(Slot::Pointer { .. }))
    }
}

/// Clones `source` down to `fields`, returning `previous` instead if it holds the same value.
fn restrict<T: Record>(source: &Rc<T>, fields: &FieldSet, previous: Option<Rc<T>>) -> Result<Rc<T>> {
    let cloned = source.clone_fields(fields)?;
    match previous {
        Some(previous) if previous.is_equal(&cloned) => Ok(previous),
        _ => Ok(Rc::new(cloned)),
    }
}

fn dangling(key: &FieldSet, target: &FieldSet) -> CacheError {
    CacheError::DanglingPointer {
        key: key.key(),
        target: target.key(),
    }
}
