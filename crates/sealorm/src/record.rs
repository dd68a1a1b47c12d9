//! In-memory records and their out-of-band seal state.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// A column value.
pub type Value = serde_json::Value;

/// Resident columns keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Whether further lazy fetches from a record are violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SealState {
    /// Lazy fetches are silent.
    #[default]
    Unsealed,
    /// Lazy fetches through guarded accessors are reported.
    Sealed,
}

/// A relation cache entry.
#[derive(Debug, Clone)]
pub enum Cached {
    /// Single-valued relation: the related record, or a known absence.
    One(Option<Record>),
    /// Prefetched collection, in fetch order.
    Many(Vec<Record>),
}

/// Stored relation cache slot. Back-references to the record that loaded
/// this one are weak, so an owner and its children never keep each other alive.
enum Slot {
    Held(Cached),
    Owner(Weak<RecordInner>),
}

impl Slot {
    fn get(&self) -> Option<Cached> {
        match self {
            Slot::Held(entry) => Some(entry.clone()),
            Slot::Owner(owner) => owner.upgrade().map(|inner| Cached::One(Some(Record(inner)))),
        }
    }
}

struct RecordInner {
    model: String,
    concrete: String,
    pk: String,
    fields: RefCell<Row>,
    state: Cell<SealState>,
    cache: RefCell<BTreeMap<String, Slot>>,
    annotations: RefCell<Row>,
}

/// A shared handle to one materialized row.
///
/// Columns absent from the resident set are deferred. Cloning the handle
/// shares the underlying record, including its seal state and relation cache.
#[derive(Clone)]
pub struct Record(Rc<RecordInner>);

impl Record {
    pub(crate) fn new(model: &str, concrete: &str, pk: &str, fields: Row) -> Self {
        Record(Rc::new(RecordInner {
            model: model.to_string(),
            concrete: concrete.to_string(),
            pk: pk.to_string(),
            fields: RefCell::new(fields),
            state: Cell::new(SealState::Unsealed),
            cache: RefCell::new(BTreeMap::new()),
            annotations: RefCell::new(Row::new()),
        }))
    }

    /// Model name the record was instantiated as (may be a proxy).
    pub fn model(&self) -> &str {
        &self.0.model
    }

    /// Storage-backed model behind [`Record::model`].
    pub fn concrete_model(&self) -> &str {
        &self.0.concrete
    }

    /// Primary key column name.
    pub fn pk_column(&self) -> &str {
        &self.0.pk
    }

    /// Primary key value, when resident and not null.
    pub fn pk(&self) -> Option<Value> {
        self.resident(&self.0.pk).filter(|v| !v.is_null())
    }

    // ==================== Seal state ====================

    /// Stamp this record sealed. Idempotent; relation caches are left untouched.
    pub fn seal(&self) {
        self.0.state.set(SealState::Sealed);
    }

    /// Whether the record is sealed.
    pub fn is_sealed(&self) -> bool {
        self.0.state.get() == SealState::Sealed
    }

    /// Current seal state.
    pub fn seal_state(&self) -> SealState {
        self.0.state.get()
    }

    pub(crate) fn set_seal_state(&self, state: SealState) {
        self.0.state.set(state);
    }

    // ==================== Resident columns ====================

    /// Read a resident column without going through any accessor.
    pub fn resident(&self, column: &str) -> Option<Value> {
        self.0.fields.borrow().get(column).cloned()
    }

    /// Whether a column was loaded.
    pub fn is_resident(&self, column: &str) -> bool {
        self.0.fields.borrow().contains_key(column)
    }

    /// Snapshot of all resident columns.
    pub fn resident_fields(&self) -> Row {
        self.0.fields.borrow().clone()
    }

    /// Set (or load) a column value.
    pub fn set_value(&self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.fields.borrow_mut().insert(column.into(), value.into());
    }

    // ==================== Relation cache ====================

    /// Cached relation entry under `key`.
    ///
    /// A back-reference whose owner has been dropped reads as not cached.
    pub fn cached(&self, key: &str) -> Option<Cached> {
        self.0.cache.borrow().get(key).and_then(Slot::get)
    }

    /// Whether `key` has a relation cache entry.
    pub fn is_cached(&self, key: &str) -> bool {
        self.cached(key).is_some()
    }

    /// Cache a resolved single relation (`None` records a known absence).
    pub fn cache_related(&self, key: impl Into<String>, related: Option<Record>) {
        self.cache(key, Cached::One(related));
    }

    /// Cache a prefetched collection.
    pub fn cache_prefetched(&self, key: impl Into<String>, records: Vec<Record>) {
        self.cache(key, Cached::Many(records));
    }

    pub(crate) fn cache(&self, key: impl Into<String>, entry: Cached) {
        self.0.cache.borrow_mut().insert(key.into(), Slot::Held(entry));
    }

    /// Cache the record this one was loaded through, on the other side of a
    /// one-to-one or many-to-one relation. The owner is held weakly.
    pub(crate) fn cache_owner(&self, key: impl Into<String>, owner: &Record) {
        self.0
            .cache
            .borrow_mut()
            .insert(key.into(), Slot::Owner(Rc::downgrade(&owner.0)));
    }

    pub(crate) fn cache_entries(&self) -> BTreeMap<String, Cached> {
        self.0
            .cache
            .borrow()
            .iter()
            .filter_map(|(key, slot)| Some((key.clone(), slot.get()?)))
            .collect()
    }

    // ==================== Annotations ====================

    /// Extra value attached by the backend (e.g. prefetch owner keys).
    pub fn annotation(&self, name: &str) -> Option<Value> {
        self.0.annotations.borrow().get(name).cloned()
    }

    pub(crate) fn annotations(&self) -> Row {
        self.0.annotations.borrow().clone()
    }

    pub(crate) fn set_annotations(&self, annotations: Row) {
        *self.0.annotations.borrow_mut() = annotations;
    }

    /// Whether both handles point at the same in-memory record.
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} instance>", self.0.model)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.0.model)
            .field("pk", &self.pk())
            .field("state", &self.0.state.get())
            .finish()
    }
}

/// Records compare equal when they share a concrete model and a primary key.
/// Records without a primary key are only equal to themselves.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.0.concrete != other.0.concrete {
            return false;
        }
        match (self.pk(), other.pk()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
