//! Handles on multi-valued relations.

use crate::backend::Backend;
use crate::error::{SealError, SealResult, UnsealedAttributeAccess};
use crate::query::QuerySet;
use crate::record::{Record, Value};
use crate::session::Session;

/// A record's collection relation.
///
/// Three flavours exist:
/// - prefetched: served from the owner's cache, never guarded;
/// - restricted: the owner is sealed and nothing was prefetched. The first
///   materialization (full fetch, indexed access, `first`, `last`, `count`,
///   `get_by_pk`) reports the violation;
/// - lazy: plain queryset behaviour.
///
/// Refinements (`filter`, `exclude`, `order_by`, ...) return an ordinary
/// [`QuerySet`] and never report.
#[derive(Debug, Clone)]
pub struct RelatedSet {
    name: String,
    owner: Record,
    query: QuerySet,
    prefetched: Option<Vec<Record>>,
    restriction: Option<UnsealedAttributeAccess>,
    reported: bool,
    results: Option<Vec<Record>>,
    back_reference: Option<String>,
}

impl RelatedSet {
    pub(crate) fn prefetched(name: &str, owner: &Record, query: QuerySet, records: Vec<Record>) -> Self {
        Self {
            prefetched: Some(records),
            ..Self::lazy(name, owner, query)
        }
    }

    pub(crate) fn restricted(
        name: &str,
        owner: &Record,
        query: QuerySet,
        violation: UnsealedAttributeAccess,
    ) -> Self {
        Self {
            restriction: Some(violation),
            ..Self::lazy(name, owner, query)
        }
    }

    pub(crate) fn lazy(name: &str, owner: &Record, query: QuerySet) -> Self {
        Self {
            name: name.to_string(),
            owner: owner.clone(),
            query,
            prefetched: None,
            restriction: None,
            reported: false,
            results: None,
            back_reference: None,
        }
    }

    /// Fetched members get `name` cached as a back-reference to the owner.
    pub(crate) fn with_back_reference(mut self, name: Option<String>) -> Self {
        self.back_reference = name;
        self
    }

    fn adopt(&self, records: &[Record]) {
        if let Some(name) = &self.back_reference {
            for record in records {
                record.cache_owner(name.clone(), &self.owner);
            }
        }
    }

    /// Relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record owning the collection.
    pub fn owner(&self) -> &Record {
        &self.owner
    }

    /// Whether the collection is served from the prefetch cache.
    pub fn is_prefetched(&self) -> bool {
        self.prefetched.is_some()
    }

    /// Whether materializing the collection will be reported.
    pub fn is_restricted(&self) -> bool {
        self.restriction.is_some()
    }

    /// Whether the members are already in memory.
    pub fn is_materialized(&self) -> bool {
        self.prefetched.is_some() || self.results.is_some()
    }

    /// Members already in memory, if any.
    pub fn loaded(&self) -> Option<&[Record]> {
        self.prefetched.as_deref().or(self.results.as_deref())
    }

    /// A fresh handle on the same collection (same restriction, same cache).
    pub fn all(&self) -> RelatedSet {
        Self {
            reported: false,
            results: None,
            ..self.clone()
        }
    }

    // ==================== Refinements ====================

    /// The underlying unguarded queryset.
    pub fn query(&self) -> QuerySet {
        self.query.clone()
    }

    /// Refine with `field = value`.
    pub fn filter(&self, field: impl Into<String>, value: impl Into<Value>) -> QuerySet {
        self.query().filter(field, value)
    }

    /// Refine by excluding `field = value`.
    pub fn exclude(&self, field: impl Into<String>, value: impl Into<Value>) -> QuerySet {
        self.query().exclude(field, value)
    }

    /// Refine with an ascending order.
    pub fn order_by(&self, field: impl Into<String>) -> QuerySet {
        self.query().order_by(field)
    }

    /// Refine with a descending order.
    pub fn order_by_desc(&self, field: impl Into<String>) -> QuerySet {
        self.query().order_by_desc(field)
    }

    /// Refine with a slice.
    pub fn slice(&self, offset: usize, limit: usize) -> QuerySet {
        self.query().offset(offset).limit(limit)
    }

    /// Refine with eager joins.
    pub fn select_related<S: AsRef<str>>(&self, paths: impl IntoIterator<Item = S>) -> QuerySet {
        self.query().select_related(paths)
    }

    // ==================== Materialization ====================

    fn check<B: Backend>(&mut self, session: &Session<B>) -> SealResult<()> {
        if self.reported {
            return Ok(());
        }
        if let Some(violation) = &self.restriction {
            session.report(violation.clone(), &self.owner)?;
        }
        self.reported = true;
        Ok(())
    }

    /// Every member, in order.
    pub fn fetch_all<B: Backend>(&mut self, session: &Session<B>) -> SealResult<Vec<Record>> {
        if let Some(records) = self.loaded() {
            return Ok(records.to_vec());
        }
        self.check(session)?;
        let records = self.query.fetch_all(session)?;
        self.adopt(&records);
        self.results = Some(records.clone());
        Ok(records)
    }

    /// Member at `index`.
    pub fn get<B: Backend>(&mut self, session: &Session<B>, index: usize) -> SealResult<Option<Record>> {
        if let Some(records) = self.loaded() {
            return Ok(records.get(index).cloned());
        }
        self.check(session)?;
        let records = self.query.clone().offset(index).limit(1).fetch_all(session)?;
        self.adopt(&records);
        Ok(records.into_iter().next())
    }

    /// First member (by primary key unless ordered).
    pub fn first<B: Backend>(&mut self, session: &Session<B>) -> SealResult<Option<Record>> {
        if let Some(records) = self.loaded() {
            return Ok(records.first().cloned());
        }
        self.check(session)?;
        let first = self.query.first(session)?;
        self.adopt(first.as_slice());
        Ok(first)
    }

    /// Last member.
    pub fn last<B: Backend>(&mut self, session: &Session<B>) -> SealResult<Option<Record>> {
        if let Some(records) = self.loaded() {
            return Ok(records.last().cloned());
        }
        self.check(session)?;
        let last = self.query.fetch_all(session)?.pop();
        self.adopt(last.as_slice());
        Ok(last)
    }

    /// Member with the given primary key.
    pub fn get_by_pk<B: Backend>(
        &mut self,
        session: &Session<B>,
        pk: impl Into<Value>,
    ) -> SealResult<Record> {
        let pk = pk.into();
        if let Some(records) = self.loaded() {
            return records
                .iter()
                .find(|r| r.pk().as_ref() == Some(&pk))
                .cloned()
                .ok_or_else(|| {
                    SealError::does_not_exist(format!(
                        "{} matching query does not exist.",
                        self.query.model()
                    ))
                });
        }
        self.check(session)?;
        let record = self.query.clone().filter("pk", pk).get(session)?;
        self.adopt(std::slice::from_ref(&record));
        Ok(record)
    }

    /// Number of members.
    pub fn count<B: Backend>(&mut self, session: &Session<B>) -> SealResult<usize> {
        Ok(self.fetch_all(session)?.len())
    }
}
