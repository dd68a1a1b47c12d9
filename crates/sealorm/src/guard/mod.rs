//! Attribute access on records.
//!
//! Every read goes through the accessor the registry installed for the
//! attribute. Plain accessors behave as the host ORM would; guarded accessors
//! report lazy fetches on sealed records before (or instead of, in strict
//! mode) letting them through.

mod field;
mod multi;
mod single;

use crate::backend::Backend;
use crate::descriptor::Descriptor;
use crate::error::{SealError, SealResult};
use crate::record::{Record, Value};
use crate::related_set::RelatedSet;
use crate::session::Session;

impl Record {
    /// Read a column (or the raw id column of a forward relation).
    ///
    /// A deferred column is loaded with one fetch; on a sealed record whose
    /// accessor is guarded, that fetch is reported first.
    pub fn value<B: Backend>(&self, session: &Session<B>, name: &str) -> SealResult<Value> {
        let accessor = session.registry().accessor(self.model(), name)?;
        match accessor.descriptor() {
            Descriptor::Field(field) => field::read(self, session, field, accessor.is_guarded()),
            Descriptor::Relation(rel) => Err(SealError::usage(format!(
                "'{}' on {} is a relation; use related() or related_set()",
                rel.name,
                self.model()
            ))),
        }
    }

    /// Follow a single-valued relation.
    ///
    /// Returns `None` for a null reference. A reverse one-to-one without a
    /// related record is a `DoesNotExist` error.
    pub fn related<B: Backend>(&self, session: &Session<B>, name: &str) -> SealResult<Option<Record>> {
        let accessor = session.registry().accessor(self.model(), name)?;
        let Descriptor::Relation(rel) = accessor.descriptor() else {
            return Err(SealError::usage(format!(
                "'{name}' on {} is a field; use value()",
                self.model()
            )));
        };
        if !rel.kind.is_single() {
            return Err(SealError::usage(format!(
                "'{name}' on {} is a collection; use related_set()",
                self.model()
            )));
        }
        single::read(self, session, rel, accessor.is_guarded())
    }

    /// Handle on a multi-valued relation.
    ///
    /// Prefetched collections are served from the cache. On a sealed record
    /// whose accessor is guarded, the handle reports its first materialization.
    pub fn related_set<B: Backend>(&self, session: &Session<B>, name: &str) -> SealResult<RelatedSet> {
        let accessor = session.registry().accessor(self.model(), name)?;
        let Descriptor::Relation(rel) = accessor.descriptor() else {
            return Err(SealError::usage(format!(
                "'{name}' on {} is a field; use value()",
                self.model()
            )));
        };
        if rel.kind.is_single() {
            return Err(SealError::usage(format!(
                "'{name}' on {} is single-valued; use related()",
                self.model()
            )));
        }
        multi::read(self, session, rel, accessor.is_guarded())
    }

    /// Prefetched collection stored under `key` (a prefetch identity or `to_attr`).
    pub fn prefetched(&self, key: &str) -> Option<Vec<Record>> {
        match self.cached(key) {
            Some(crate::record::Cached::Many(records)) => Some(records),
            _ => None,
        }
    }
}
