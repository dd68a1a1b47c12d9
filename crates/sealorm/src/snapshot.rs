//! Serializable snapshots of record graphs.
//!
//! A snapshot keeps resident columns, the seal state and every relation cache
//! entry, so a restored graph answers the same accesses without fetching.
//! Back-references to an enclosing record are stored by depth and re-linked
//! on restore.

use crate::error::{SealError, SealResult};
use crate::record::{Cached, Record, Row, SealState};
use crate::related_set::RelatedSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Snapshot of one record and everything in its relation cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// Model the record was instantiated as.
    pub model: String,
    /// Storage-backed model.
    pub concrete: String,
    /// Primary key column.
    pub pk: String,
    /// Resident columns.
    pub fields: Row,
    /// Whether the record was sealed.
    #[serde(default)]
    pub sealed: bool,
    /// Relation cache entries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cache: BTreeMap<String, CachedSnapshot>,
    /// Backend annotations.
    #[serde(default, skip_serializing_if = "Row::is_empty")]
    pub annotations: Row,
}

/// Snapshot of a relation cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachedSnapshot {
    /// Single related record or a known absence.
    One(Option<Box<RecordSnapshot>>),
    /// Prefetched collection.
    Many(Vec<RecordSnapshot>),
    /// The enclosing record this many levels up (0 is the record itself,
    /// 1 its direct owner).
    Owner(usize),
}

impl RecordSnapshot {
    /// Capture a record graph.
    ///
    /// Single relations pointing at an enclosing record become
    /// [`CachedSnapshot::Owner`]; any other cycle is rejected.
    pub fn capture(record: &Record) -> SealResult<Self> {
        Self::capture_inner(record, &mut Vec::new())
    }

    fn capture_inner(record: &Record, path: &mut Vec<Record>) -> SealResult<Self> {
        if path.iter().any(|r| r.ptr_eq(record)) {
            return Err(SealError::usage(format!(
                "cannot snapshot {record}: a collection in its relation cache refers back to it"
            )));
        }
        path.push(record.clone());

        let mut cache = BTreeMap::new();
        for (key, entry) in record.cache_entries() {
            let entry = match entry {
                Cached::One(None) => CachedSnapshot::One(None),
                Cached::One(Some(related)) => {
                    match path.iter().rposition(|r| r.ptr_eq(&related)) {
                        Some(index) => CachedSnapshot::Owner(path.len() - 1 - index),
                        None => CachedSnapshot::One(Some(Box::new(Self::capture_inner(
                            &related, path,
                        )?))),
                    }
                }
                Cached::Many(records) => CachedSnapshot::Many(
                    records
                        .iter()
                        .map(|r| Self::capture_inner(r, path))
                        .collect::<SealResult<_>>()?,
                ),
            };
            cache.insert(key, entry);
        }
        path.pop();

        Ok(Self {
            model: record.model().to_string(),
            concrete: record.concrete_model().to_string(),
            pk: record.pk_column().to_string(),
            fields: record.resident_fields(),
            sealed: record.is_sealed(),
            cache,
            annotations: record.annotations(),
        })
    }

    /// Rebuild the record graph.
    ///
    /// A [`CachedSnapshot::Owner`] entry reaching above the root is dropped.
    pub fn restore(self) -> Record {
        self.restore_inner(&mut Vec::new())
    }

    fn restore_inner(self, path: &mut Vec<Record>) -> Record {
        let record = Record::new(&self.model, &self.concrete, &self.pk, self.fields);
        if self.sealed {
            record.set_seal_state(SealState::Sealed);
        }
        record.set_annotations(self.annotations);
        path.push(record.clone());
        for (key, entry) in self.cache {
            match entry {
                CachedSnapshot::One(related) => {
                    let related = related.map(|r| r.restore_inner(path));
                    record.cache(key, Cached::One(related));
                }
                CachedSnapshot::Many(records) => {
                    let records = records.into_iter().map(|r| r.restore_inner(path)).collect();
                    record.cache(key, Cached::Many(records));
                }
                CachedSnapshot::Owner(depth) => {
                    if let Some(owner) = path.len().checked_sub(depth + 1).map(|i| &path[i]) {
                        record.cache_owner(key, owner);
                    }
                }
            }
        }
        path.pop();
        record
    }
}

/// Snapshot of a materialized collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// Relation name.
    pub name: String,
    /// Members, in order.
    pub records: Vec<RecordSnapshot>,
}

impl CollectionSnapshot {
    /// Rebuild the members.
    pub fn restore(self) -> Vec<Record> {
        self.records.into_iter().map(RecordSnapshot::restore).collect()
    }
}

impl RelatedSet {
    /// Snapshot the members already in memory.
    ///
    /// Fails when the collection was neither prefetched nor fetched, since a
    /// snapshot never fetches.
    pub fn snapshot(&self) -> SealResult<CollectionSnapshot> {
        let records = self.loaded().ok_or_else(|| {
            SealError::usage(format!(
                "cannot snapshot '{}' before it is prefetched or fetched",
                self.name()
            ))
        })?;
        Ok(CollectionSnapshot {
            name: self.name().to_string(),
            records: records
                .iter()
                .map(RecordSnapshot::capture)
                .collect::<SealResult<_>>()?,
        })
    }
}

impl Record {
    /// Serialize the record graph to JSON.
    pub fn to_json(&self) -> SealResult<String> {
        Ok(serde_json::to_string(&RecordSnapshot::capture(self)?)?)
    }

    /// Restore a record graph from JSON produced by [`Record::to_json`].
    pub fn from_json(json: &str) -> SealResult<Record> {
        let snapshot: RecordSnapshot = serde_json::from_str(json)?;
        Ok(snapshot.restore())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RecordSnapshot::capture(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RecordSnapshot::deserialize(deserializer).map(RecordSnapshot::restore)
    }
}
