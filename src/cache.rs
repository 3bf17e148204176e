use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
    mem::take,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;
use indexmap::IndexMap;
use tracing::{debug, error};

use crate::{
    primary_key::PkCacheKey,
    record_cache::{ChangeListener, Changes, RecordCache},
    CacheError, FieldSet, PrimaryKey, Record, Result, Subscription,
};


type ListChangeListener<T> = dyn Fn(&[Option<Rc<T>>], &[Option<Rc<T>>]);

/// Cache for records based on the set of fields populated on them.
///
/// Records are cached by primary key and by the field names set on them. A record with
/// `id`, `name` and `email` can be cached for `name`, for `email` or for both, which is the
/// common case of fetching partial data from a backend. Primary key fields are implicit in
/// every field set.
///
/// Adding a record updates every cached field set that is a subset of its fields. Adding a
/// record for `name` and `email` updates what `get(pk, ["name"])` returns, but adding a record
/// for `name` alone does not touch the entry for `name` and `email`.
///
/// Listeners are called synchronously from the operation that changed the cache, after the
/// cache itself has been updated, so they may freely read from or write to it.
///
/// `ViewModelCache` is a handle: clones share the same cache.
#[derive_ex(Clone, bound())]
pub struct ViewModelCache<T>(Rc<CacheNode<T>>);

impl<T: Record> ViewModelCache<T> {
    /// Creates an empty cache for records whose primary key is made of `pk_field_names`.
    pub fn new<I>(pk_field_names: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self::with_model(None, pk_field_names)
    }

    /// Creates an empty cache that only accepts records whose [`Record::model_name`] is `model`.
    pub fn for_model<I>(model: impl Into<String>, pk_field_names: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self::with_model(Some(model.into()), pk_field_names)
    }

    fn with_model<I>(model: Option<String>, pk_field_names: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self(Rc::new(CacheNode {
            model,
            pk_fields: FieldSet::new(pk_field_names),
            records: RefCell::new(IndexMap::new()),
            batch: RefCell::new(Batch::default()),
            any_listeners: RefCell::new(Vec::new()),
            last_all: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        }))
    }

    pub fn pk_field_names(&self) -> &FieldSet {
        &self.0.pk_fields
    }

    /// The model this cache was created for, if any.
    pub fn model_name(&self) -> Option<&str> {
        self.0.model.as_deref()
    }

    /// Returns `true` while [`add_list`](Self::add_list) is running.
    pub fn is_batching(&self) -> bool {
        self.0.is_batching()
    }

    /// Adds a record to the cache, keyed by the fields assigned on it.
    ///
    /// Adding a record whose value equals what is already cached for its fields is a no-op:
    /// the cached instance is kept and no listener is called.
    pub fn add(&self, record: impl Into<Rc<T>>) -> Result<Rc<T>> {
        let record = record.into();
        self.0.check_record(&record)?;
        let changes = self.0.add_raw(&record)?;
        self.0.dispatch(changes);
        Ok(record)
    }

    /// Adds multiple records.
    ///
    /// Listeners registered with [`add_listener_list`](Self::add_listener_list) or
    /// [`add_any_listener`](Self::add_any_listener) are called once after all records have
    /// been added rather than once per record. Listeners on a single record are still called
    /// as each record is added.
    ///
    /// Every record is validated before any is added. Calling this from a listener while
    /// another `add_list` is running joins the outer batch.
    pub fn add_list<I>(&self, records: I) -> Result<Vec<Rc<T>>>
    where
        I: IntoIterator,
        I::Item: Into<Rc<T>>,
    {
        let records: Vec<Rc<T>> = records.into_iter().map(Into::into).collect();
        for record in &records {
            self.0.check_record(record)?;
        }
        let scope = BatchScope::enter(&self.0);
        let mut result = Ok(());
        for record in &records {
            match self.0.add_raw(record) {
                Ok(changes) => self.0.dispatch(changes),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if let Some(pending) = scope.finish() {
            pending.flush(&self.0);
        }
        result.map(|()| records)
    }

    /// Gets the record for `pk` with exactly `fields` set.
    ///
    /// Returns `Ok(None)` if no record with these fields (or a superset of them) is cached.
    /// Repeated calls without intervening changes return the same `Rc`.
    pub fn get<F>(&self, pk: impl Into<PrimaryKey>, fields: F) -> Result<Option<Rc<T>>>
    where
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        self.0.get(&pk.into(), &self.0.fields(fields))
    }

    /// Gets the latest cached version of `record`, with the same fields set.
    pub fn get_latest(&self, record: &T) -> Result<Option<Rc<T>>> {
        self.0.check_model(record)?;
        let fields = record.assigned_fields().without(&self.0.pk_fields);
        self.0.get(&record.pk(), &fields)
    }

    /// Gets records for multiple primary keys.
    ///
    /// The result has one entry per primary key, `None` for records that are not cached.
    pub fn get_list<P, F>(&self, pks: P, fields: F) -> Result<Vec<Option<Rc<T>>>>
    where
        P: IntoIterator,
        P::Item: Into<PrimaryKey>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let pks: Vec<PrimaryKey> = pks.into_iter().map(Into::into).collect();
        self.0.get_list(&pks, &self.0.fields(fields))
    }

    /// Like [`get_list`](Self::get_list), but leaves out records that are not cached.
    pub fn get_list_cached<P, F>(&self, pks: P, fields: F) -> Result<Vec<Rc<T>>>
    where
        P: IntoIterator,
        P::Item: Into<PrimaryKey>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        Ok(self.get_list(pks, fields)?.into_iter().flatten().collect())
    }

    /// Gets every cached record that has `fields`, in the order the records were first cached.
    ///
    /// Returns the same `Rc` as the previous call for `fields` if none of the records changed.
    pub fn get_all<F>(&self, fields: F) -> Result<Rc<[Rc<T>]>>
    where
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let fields = self.0.fields(fields);
        let mut records = Vec::new();
        let mut changes = Changes::new();
        for record_cache in self.0.records.borrow_mut().values_mut() {
            if let Some(record) = record_cache.get(&fields, &mut changes)? {
                records.push(record);
            }
        }
        self.0.dispatch(changes);
        let mut last_all = self.0.last_all.borrow_mut();
        if let Some(last) = last_all.get(&fields) {
            if last.len() == records.len() && last.iter().zip(&records).all(|(a, b)| Rc::ptr_eq(a, b)) {
                return Ok(last.clone());
            }
        }
        let records: Rc<[Rc<T>]> = records.into();
        last_all.insert(fields, records.clone());
        Ok(records)
    }

    /// Removes everything cached for `pk`.
    ///
    /// Returns `true` if anything was removed.
    pub fn delete(&self, pk: impl Into<PrimaryKey>) -> Result<bool> {
        self.0.delete(&pk.into(), None)
    }

    /// Removes the entry for `pk` with exactly `fields` set.
    ///
    /// Entries for other field sets are kept. Entries that were only derived from the removed
    /// one are derived again from the most recent remaining superset, or removed.
    pub fn delete_fields<F>(&self, pk: impl Into<PrimaryKey>, fields: F) -> Result<bool>
    where
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        self.0.delete(&pk.into(), Some(&self.0.fields(fields)))
    }

    /// Listens for additions, changes and deletions of the record `pk` with `fields` set.
    ///
    /// `f` is called with the previous and the new value. Dropping the returned
    /// [`Subscription`] removes the listener.
    pub fn add_listener<F>(
        &self,
        pk: impl Into<PrimaryKey>,
        fields: F,
        f: impl Fn(Option<&Rc<T>>, Option<&Rc<T>>) + 'static,
    ) -> Result<Subscription>
    where
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        self.listen(pk.into(), self.0.fields(fields), Rc::new(f))
    }

    /// Listens for changes to any of the records `pks` with `fields` set.
    ///
    /// `f` is called with the previous and the new values, in the order of `pks`. During
    /// [`add_list`](Self::add_list) `f` is called once, after all records have been added,
    /// with the values from before the batch.
    pub fn add_listener_list<P, F>(
        &self,
        pks: P,
        fields: F,
        f: impl Fn(&[Option<Rc<T>>], &[Option<Rc<T>>]) + 'static,
    ) -> Result<Subscription>
    where
        P: IntoIterator,
        P::Item: Into<PrimaryKey>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let pks: Vec<PrimaryKey> = pks.into_iter().map(Into::into).collect();
        let fields = self.0.fields(fields);
        let previous = self.0.get_list(&pks, &fields)?;
        let listener = Rc::new(ListListener {
            node: Rc::downgrade(&self.0),
            pks: pks.clone(),
            fields: fields.clone(),
            previous: RefCell::new(previous),
            batch_previous: RefCell::new(None),
            is_active: Cell::new(true),
            f: Box::new(f),
        });
        let mut seen = HashSet::new();
        let mut subscriptions = Vec::new();
        for pk in pks {
            if !seen.insert(pk.cache_key()) {
                continue;
            }
            let listener = listener.clone();
            subscriptions.push(self.listen(
                pk,
                fields.clone(),
                Rc::new(move |_: Option<&Rc<T>>, _: Option<&Rc<T>>| listener.on_change()),
            )?);
        }
        Ok(Subscription::from_fn(move || {
            listener.is_active.set(false);
            drop(subscriptions);
        }))
    }

    /// Listens for any change at all. The details of the change are not available.
    pub fn add_any_listener(&self, f: impl Fn() + 'static) -> Subscription {
        let id = self.0.next_id();
        self.0.any_listeners.borrow_mut().push((id, Rc::new(f)));
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.any_listeners.borrow_mut().retain(|(i, _)| *i != id);
        })
    }

    fn listen(&self, pk: PrimaryKey, fields: FieldSet, f: Rc<ChangeListener<T>>) -> Result<Subscription> {
        self.0.check_pk(&pk)?;
        let id = self.0.next_id();
        let pk_key = pk.cache_key();
        let mut changes = Changes::new();
        self.0
            .records
            .borrow_mut()
            .entry(pk_key.clone())
            .or_insert_with(RecordCache::new)
            .add_listener(&fields, id, f, &mut changes)?;
        self.0.dispatch(changes);
        Ok(Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            if let Some(record_cache) = node.records.borrow_mut().get_mut(&pk_key) {
                record_cache.remove_listener(&fields, id);
            }
        }))
    }
}

struct CacheNode<T> {
    model: Option<String>,
    pk_fields: FieldSet,
    records: RefCell<IndexMap<PkCacheKey, RecordCache<T>>>,
    batch: RefCell<Batch>,
    any_listeners: RefCell<Vec<(u64, Rc<dyn Fn()>)>>,
    last_all: RefCell<HashMap<FieldSet, Rc<[Rc<T>]>>>,
    next_id: Cell<u64>,
}

impl<T: Record> CacheNode<T> {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
    fn fields<F>(&self, fields: F) -> FieldSet
    where
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        FieldSet::new(fields).without(&self.pk_fields)
    }

    fn check_record(&self, record: &T) -> Result<()> {
        self.check_model(record)?;
        if record.assigned_fields().is_empty() {
            return Err(CacheError::NoAssignedFields);
        }
        self.check_pk(&record.pk())
    }
    fn check_model(&self, record: &T) -> Result<()> {
        match (&self.model, record.model_name()) {
            (Some(expected), Some(actual)) if expected != actual => Err(CacheError::WrongModel {
                expected: expected.clone(),
                actual: actual.to_owned(),
            }),
            _ => Ok(()),
        }
    }
    fn check_pk(&self, pk: &PrimaryKey) -> Result<()> {
        let pk_fields = &self.pk_fields;
        match pk {
            PrimaryKey::Scalar(_) if pk_fields.len() > 1 => Err(CacheError::CompoundKeyExpected {
                fields: pk_fields.join(", "),
            }),
            PrimaryKey::Compound(_) if pk_fields.len() == 1 => Err(CacheError::ScalarKeyExpected {
                field: pk_fields.join(", "),
            }),
            PrimaryKey::Compound(parts) if pk_fields.len() > 1 => {
                let missing: FieldSet = pk_fields.iter().filter(|name| !parts.contains_key(*name)).collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(CacheError::MissingKeyValues {
                        fields: pk_fields.join(", "),
                        missing: missing.join(", "),
                    })
                }
            }
            _ => Ok(()),
        }
    }

    fn add_raw(&self, record: &Rc<T>) -> Result<Changes<T>> {
        let pk = record.pk();
        let fields = record.assigned_fields().without(&self.pk_fields);
        debug!(pk = %pk, fields = %fields, "caching record");
        self.records
            .borrow_mut()
            .entry(pk.cache_key())
            .or_insert_with(RecordCache::new)
            .add(record, fields)
    }

    fn get(&self, pk: &PrimaryKey, fields: &FieldSet) -> Result<Option<Rc<T>>> {
        self.check_pk(pk)?;
        let mut changes = Changes::new();
        let record = match self.records.borrow_mut().get_mut(&pk.cache_key()) {
            Some(record_cache) => record_cache.get(fields, &mut changes)?,
            None => None,
        };
        self.dispatch(changes);
        Ok(record)
    }
    fn get_list(&self, pks: &[PrimaryKey], fields: &FieldSet) -> Result<Vec<Option<Rc<T>>>> {
        pks.iter().map(|pk| self.get(pk, fields)).collect()
    }

    fn delete(&self, pk: &PrimaryKey, fields: Option<&FieldSet>) -> Result<bool> {
        self.check_pk(pk)?;
        let changes = {
            let mut records = self.records.borrow_mut();
            let Some(record_cache) = records.get_mut(&pk.cache_key()) else {
                return Ok(false);
            };
            record_cache.delete(fields)?
        };
        let removed = changes.changed;
        if removed {
            match fields {
                Some(fields) => debug!(pk = %pk, fields = %fields, "deleted cached record"),
                None => debug!(pk = %pk, "deleted all cached records"),
            }
        }
        self.dispatch(changes);
        Ok(removed)
    }

    /// Calls listeners for `changes`. No borrow of the cache may be held.
    fn dispatch(&self, changes: Changes<T>) {
        for notification in &changes.notifications {
            notification.dispatch();
        }
        if changes.changed {
            self.on_any_change();
        }
    }

    fn on_any_change(&self) {
        let mut batch = self.batch.borrow_mut();
        if batch.depth > 0 {
            batch.any_changed = true;
        } else {
            drop(batch);
            self.notify_any();
        }
    }
    fn notify_any(&self) {
        let listeners: Vec<Rc<dyn Fn()>> = self
            .any_listeners
            .borrow()
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for f in listeners {
            f();
        }
    }

    fn is_batching(&self) -> bool {
        self.batch.borrow().depth > 0
    }
    fn defer(&self, deferred: Rc<dyn Deferred>) {
        self.batch.borrow_mut().pending.push_back(deferred);
    }
    fn leave_batch(&self) -> Option<Pending> {
        let mut batch = self.batch.borrow_mut();
        batch.depth -= 1;
        if batch.depth != 0 {
            return None;
        }
        Some(Pending {
            deferred: take(&mut batch.pending),
            any_changed: take(&mut batch.any_changed),
        })
    }
}

#[derive(Default)]
struct Batch {
    depth: usize,
    pending: VecDeque<Rc<dyn Deferred>>,
    any_changed: bool,
}

/// Keeps the cache in batch mode while alive.
///
/// Dropping it without [`finish`](Self::finish) (ie. while unwinding) leaves batch mode and
/// discards the notifications collected so far.
struct BatchScope<'a, T: Record> {
    node: &'a CacheNode<T>,
    is_finished: bool,
}
impl<'a, T: Record> BatchScope<'a, T> {
    fn enter(node: &'a CacheNode<T>) -> Self {
        node.batch.borrow_mut().depth += 1;
        Self {
            node,
            is_finished: false,
        }
    }
    fn finish(mut self) -> Option<Pending> {
        self.is_finished = true;
        self.node.leave_batch()
    }
}
impl<T: Record> Drop for BatchScope<'_, T> {
    fn drop(&mut self) {
        if !self.is_finished {
            self.node.leave_batch();
        }
    }
}

/// Notifications deferred by a batch. Whatever is not flushed is discarded on drop.
struct Pending {
    deferred: VecDeque<Rc<dyn Deferred>>,
    any_changed: bool,
}
impl Pending {
    fn flush<T: Record>(mut self, node: &CacheNode<T>) {
        debug!(count = self.deferred.len(), "flushing batched notifications");
        while let Some(deferred) = self.deferred.pop_front() {
            deferred.flush();
        }
        if take(&mut self.any_changed) {
            node.notify_any();
        }
    }
}
impl Drop for Pending {
    fn drop(&mut self) {
        for deferred in self.deferred.drain(..) {
            deferred.discard();
        }
    }
}

trait Deferred {
    fn flush(&self);
    fn discard(&self);
}

struct ListListener<T> {
    node: Weak<CacheNode<T>>,
    pks: Vec<PrimaryKey>,
    fields: FieldSet,
    previous: RefCell<Vec<Option<Rc<T>>>>,
    batch_previous: RefCell<Option<Vec<Option<Rc<T>>>>>,
    is_active: Cell<bool>,
    f: Box<ListChangeListener<T>>,
}
impl<T: Record> ListListener<T> {
    fn read(&self, node: &CacheNode<T>) -> Option<Vec<Option<Rc<T>>>> {
        match node.get_list(&self.pks, &self.fields) {
            Ok(records) => Some(records),
            Err(e) => {
                error!(error = %e, fields = %self.fields, "failed to read records for list listener");
                None
            }
        }
    }

    fn on_change(self: &Rc<Self>) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        // Already queued; the flush reads the latest records.
        if self.batch_previous.borrow().is_some() {
            return;
        }
        if node.is_batching() {
            let previous = self.previous.borrow().clone();
            *self.batch_previous.borrow_mut() = Some(previous);
            node.defer(self.clone());
            return;
        }
        let Some(next) = self.read(&node) else {
            return;
        };
        let previous = self.previous.replace(next.clone());
        (self.f)(&previous, &next);
    }
}
impl<T: Record> Deferred for ListListener<T> {
    fn flush(&self) {
        let Some(previous) = self.batch_previous.take() else {
            return;
        };
        if !self.is_active.get() {
            return;
        }
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let Some(next) = self.read(&node) else {
            return;
        };
        self.previous.replace(next.clone());
        (self.f)(&previous, &next);
    }
    fn discard(&self) {
        self.batch_previous.take();
    }
}
