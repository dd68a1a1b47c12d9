//! Bulk query specifications.
//!
//! A [`QuerySet`] describes a pending fetch. Builder methods consume and return
//! the queryset, preserving its seal intent. Invalid lookups surface when the
//! queryset is sealed or executed.
//!
//! # Example
//!
//! ```ignore
//! let sea_lion = registry
//!     .objects("SeaLion")?
//!     .select_related(["location"])
//!     .prefetch_related(["previous_locations"])
//!     .seal()?
//!     .get(&session)?;
//! ```

use crate::backend::{Condition, FetchRequest, FetchedRow, JoinRequest};
use crate::descriptor::{Descriptor, LinkTable, RelationDescriptor, RelationKind};
use crate::error::{SealError, SealResult};
use crate::iter::SealingIter;
use crate::prefetch;
use crate::record::{Cached, Record, Row, Value};
use crate::registry::Registry;
use crate::session::Session;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Separator between relation hops in lookups (`location__climates`).
pub const LOOKUP_SEP: &str = "__";

/// Filter over model attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field = value`.
    Eq { field: String, value: Value },
    /// `field IN (values)`.
    In { field: String, values: Vec<Value> },
    /// Negation.
    Not(Box<Filter>),
    /// Rows linked from `owners` through a many-to-many link table.
    Through { link: LinkTable, owners: Vec<Value> },
}

/// Ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    /// Ascending.
    Asc(String),
    /// Descending.
    Desc(String),
}

/// Nested eager joins keyed by relation name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinTree(BTreeMap<String, JoinTree>);

impl JoinTree {
    /// Add a `__`-separated relation path.
    pub fn insert(&mut self, path: &str) {
        let mut node = self;
        for hop in path.split(LOOKUP_SEP) {
            node = node.0.entry(hop.to_string()).or_default();
        }
    }

    /// Subtree for one relation.
    pub fn get(&self, hop: &str) -> Option<&JoinTree> {
        self.0.get(hop)
    }

    /// Whether no join is requested.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Direct children.
    pub fn children(&self) -> impl Iterator<Item = (&str, &JoinTree)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether a `__`-separated path is part of the tree.
    pub fn contains_path(&self, path: &str) -> bool {
        let mut node = self;
        for hop in path.split(LOOKUP_SEP) {
            match node.0.get(hop) {
                Some(next) => node = next,
                None => return false,
            }
        }
        true
    }
}

/// Caller intent regarding sealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SealIntent {
    /// Nothing decided: prefetch rewriting may seal it.
    #[default]
    Undecided,
    /// Produced records are stamped sealed.
    Sealed,
    /// Explicitly left unsealed.
    Unsealed,
}

/// What executing the queryset produces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResultShape {
    /// Records.
    #[default]
    Records,
    /// Projected rows keyed by field name.
    Values(Vec<String>),
    /// Projected tuples.
    ValuesList(Vec<String>),
}

/// A prefetch lookup, optionally carrying the queryset used to fetch its last hop.
#[derive(Debug, Clone)]
pub struct Prefetch {
    pub(crate) through: String,
    pub(crate) query: Option<QuerySet>,
    pub(crate) to_attr: Option<String>,
    pub(crate) expanded: bool,
}

impl Prefetch {
    /// Prefetch `through` with the default queryset of its target.
    pub fn new(through: impl Into<String>) -> Self {
        Self {
            through: through.into(),
            query: None,
            to_attr: None,
            expanded: false,
        }
    }

    /// Prefetch `through` with an explicit queryset.
    pub fn with_query(through: impl Into<String>, query: QuerySet) -> Self {
        Self {
            through: through.into(),
            query: Some(query),
            to_attr: None,
            expanded: false,
        }
    }

    /// Store results under `attr` instead of the relation cache.
    pub fn to_attr(mut self, attr: impl Into<String>) -> Self {
        self.to_attr = Some(attr.into());
        self
    }

    /// Relation path.
    pub fn through(&self) -> &str {
        &self.through
    }

    /// Explicit queryset, if any.
    pub fn query(&self) -> Option<&QuerySet> {
        self.query.as_ref()
    }

    /// Attribute receiving the results, if any.
    pub fn attr(&self) -> Option<&str> {
        self.to_attr.as_deref()
    }

    /// Path under which results are stored (`to_attr` replaces the last hop).
    pub(crate) fn prefetch_to(&self) -> String {
        match &self.to_attr {
            Some(attr) => match self.through.rsplit_once(LOOKUP_SEP) {
                Some((head, _)) => format!("{head}{LOOKUP_SEP}{attr}"),
                None => attr.clone(),
            },
            None => self.through.clone(),
        }
    }
}

impl From<&str> for Prefetch {
    fn from(through: &str) -> Self {
        Prefetch::new(through)
    }
}

impl From<String> for Prefetch {
    fn from(through: String) -> Self {
        Prefetch::new(through)
    }
}

/// Specification of a pending fetch.
#[derive(Clone)]
pub struct QuerySet {
    pub(crate) registry: Arc<Registry>,
    pub(crate) model: String,
    pub(crate) filters: Vec<Filter>,
    pub(crate) ordering: Vec<Order>,
    pub(crate) offset: usize,
    pub(crate) limit: Option<usize>,
    pub(crate) only: Vec<String>,
    pub(crate) defer: Vec<String>,
    pub(crate) required: Vec<String>,
    pub(crate) select_related: JoinTree,
    pub(crate) prefetch: Vec<Prefetch>,
    pub(crate) shape: ResultShape,
    pub(crate) intent: SealIntent,
    pub(crate) sealable: bool,
    pub(crate) tag: Option<String>,
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.model)
            .field("filters", &self.filters)
            .field("ordering", &self.ordering)
            .field("select_related", &self.select_related)
            .field("prefetch", &self.prefetch)
            .field("shape", &self.shape)
            .field("intent", &self.intent)
            .field("sealable", &self.sealable)
            .finish_non_exhaustive()
    }
}

impl QuerySet {
    pub(crate) fn new(registry: Arc<Registry>, model: &str, sealable: bool) -> Self {
        Self {
            registry,
            model: model.to_string(),
            filters: Vec::new(),
            ordering: Vec::new(),
            offset: 0,
            limit: None,
            only: Vec::new(),
            defer: Vec::new(),
            required: Vec::new(),
            select_related: JoinTree::default(),
            prefetch: Vec::new(),
            shape: ResultShape::Records,
            intent: SealIntent::Undecided,
            sealable,
            tag: None,
        }
    }

    // ==================== Introspection ====================

    /// Target model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether produced records get stamped sealed.
    pub fn is_sealed(&self) -> bool {
        self.intent == SealIntent::Sealed
    }

    /// Seal intent.
    pub fn seal_intent(&self) -> SealIntent {
        self.intent
    }

    /// Whether the queryset comes from a seal-capable manager.
    pub fn is_sealable(&self) -> bool {
        self.sealable
    }

    /// Eager-join tree.
    pub fn join_tree(&self) -> &JoinTree {
        &self.select_related
    }

    /// Prefetch lookups (rewritten once sealed).
    pub fn prefetch_lookups(&self) -> &[Prefetch] {
        &self.prefetch
    }

    /// Result shape.
    pub fn shape(&self) -> &ResultShape {
        &self.shape
    }

    // ==================== Builders ====================

    /// Keep rows where `field` equals `value`.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Keep rows where `field` is one of `values`.
    pub fn filter_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.push(Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Drop rows where `field` equals `value`.
    pub fn exclude(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Not(Box::new(Filter::Eq {
            field: field.into(),
            value: value.into(),
        })));
        self
    }

    pub(crate) fn through(mut self, link: LinkTable, owners: Vec<Value>) -> Self {
        self.filters.push(Filter::Through { link, owners });
        self
    }

    /// Ascending order on `field`.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.ordering.push(Order::Asc(field.into()));
        self
    }

    /// Descending order on `field`.
    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.ordering.push(Order::Desc(field.into()));
        self
    }

    /// Fetch at most `n` rows.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skip the first `n` rows.
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    /// Load only these fields (plus primary keys and join columns).
    /// Related fields use `__` paths through the eager-join tree.
    pub fn only<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.only.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Leave these fields out of the fetch.
    pub fn defer<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.defer.extend(fields.into_iter().map(Into::into));
        self
    }

    pub(crate) fn require(mut self, column: impl Into<String>) -> Self {
        self.required.push(column.into());
        self
    }

    /// Eagerly join single-valued relations in the same fetch.
    pub fn select_related<S: AsRef<str>>(mut self, paths: impl IntoIterator<Item = S>) -> Self {
        for path in paths {
            self.select_related.insert(path.as_ref());
        }
        self
    }

    /// Resolve relations in follow-up fetches. Accepts relation paths or
    /// [`Prefetch`] objects.
    pub fn prefetch_related<P: Into<Prefetch>>(mut self, lookups: impl IntoIterator<Item = P>) -> Self {
        self.prefetch.extend(lookups.into_iter().map(Into::into));
        self
    }

    /// Project rows to the given fields (all when empty).
    pub fn values<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.shape = ResultShape::Values(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Project rows to tuples of the given fields (all when empty).
    pub fn values_list<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.shape = ResultShape::ValuesList(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Tag fetches issued by this queryset.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Stamp every produced record (and its eager joins) sealed, and rewrite
    /// prefetch lookups so their fetches are sealed too.
    pub fn seal(mut self) -> SealResult<Self> {
        if self.shape != ResultShape::Records {
            return Err(SealError::usage(
                "Cannot call seal() after .values() or .values_list()",
            ));
        }
        if !self.sealable {
            return Err(SealError::usage(format!(
                "Cannot call seal() on a {} queryset from a plain manager",
                self.model
            )));
        }
        self.intent = SealIntent::Sealed;
        self.prefetch = prefetch::normalize(&self)?;
        Ok(self)
    }

    /// Explicitly opt out of sealing (kept as-is by prefetch rewriting).
    pub fn unsealed(mut self) -> Self {
        self.intent = SealIntent::Unsealed;
        self
    }

    // ==================== Lowering ====================

    /// Lower the queryset into a backend request.
    pub fn to_request(&self) -> SealResult<FetchRequest> {
        let registry = &self.registry;
        let meta = registry.model(&self.model)?;

        let mut conditions = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            conditions.push(self.condition(filter)?);
        }
        let mut ordering = Vec::with_capacity(self.ordering.len());
        for order in &self.ordering {
            let (field, desc) = match order {
                Order::Asc(f) => (f, false),
                Order::Desc(f) => (f, true),
            };
            ordering.push((column_for(registry, &self.model, field)?, desc));
        }

        let (columns, joins) = match &self.shape {
            ResultShape::Records => {
                self.validate_paths()?;
                let columns = self.level_columns(&self.model, "", &self.select_related)?;
                let joins = self.joins(&self.model, "", &self.select_related)?;
                (columns, joins)
            }
            ResultShape::Values(fields) | ResultShape::ValuesList(fields) => {
                let columns = if fields.is_empty() {
                    registry.columns(&self.model)?
                } else {
                    fields
                        .iter()
                        .map(|f| column_for(registry, &self.model, f))
                        .collect::<SealResult<_>>()?
                };
                (columns, Vec::new())
            }
        };

        Ok(FetchRequest {
            model: meta.concrete_model().to_string(),
            conditions,
            ordering,
            offset: self.offset,
            limit: self.limit,
            columns,
            joins,
            tag: self.tag.clone(),
        })
    }

    fn condition(&self, filter: &Filter) -> SealResult<Condition> {
        Ok(match filter {
            Filter::Eq { field, value } => Condition::Eq {
                column: column_for(&self.registry, &self.model, field)?,
                value: value.clone(),
            },
            Filter::In { field, values } => Condition::In {
                column: column_for(&self.registry, &self.model, field)?,
                values: values.clone(),
            },
            Filter::Not(inner) => Condition::Not(Box::new(self.condition(inner)?)),
            Filter::Through { link, owners } => Condition::Through {
                link: link.clone(),
                owners: owners.clone(),
            },
        })
    }

    /// `only` / `defer` entries must name a field at a joined level.
    fn validate_paths(&self) -> SealResult<()> {
        for (method, entries) in [("only", &self.only), ("defer", &self.defer)] {
            for entry in entries {
                let (prefix, field) = match entry.rsplit_once(LOOKUP_SEP) {
                    Some((prefix, field)) => (prefix, field),
                    None => ("", entry.as_str()),
                };
                let invalid = || {
                    SealError::usage(format!("Invalid field name given in {method}(): '{entry}'"))
                };
                let mut model = self.model.clone();
                if !prefix.is_empty() {
                    if !self.select_related.contains_path(prefix) {
                        return Err(invalid());
                    }
                    for hop in prefix.split(LOOKUP_SEP) {
                        let rel = self.registry.relation(&model, hop)?;
                        model = rel.target_model()?.to_string();
                    }
                }
                column_for(&self.registry, &model, field).map_err(|_| invalid())?;
            }
        }
        Ok(())
    }

    fn level_entries(&self, entries: &[String], model: &str, path: &str) -> SealResult<Vec<String>> {
        let mut out = Vec::new();
        for entry in entries {
            let (prefix, field) = match entry.rsplit_once(LOOKUP_SEP) {
                Some((prefix, field)) => (prefix, field),
                None => ("", entry.as_str()),
            };
            if prefix == path {
                out.push(column_for(&self.registry, model, field)?);
            }
        }
        Ok(out)
    }

    fn level_columns(&self, model: &str, path: &str, joins: &JoinTree) -> SealResult<Vec<String>> {
        let registry = &self.registry;
        let pk = registry.model(model)?.pk().to_string();
        let mut needed = vec![pk];
        for (hop, _) in joins.children() {
            let rel = registry.relation(model, hop)?;
            if rel.kind.is_forward() {
                needed.push(rel.column.clone());
            }
        }
        if path.is_empty() {
            needed.extend(self.required.iter().cloned());
        }

        let all = registry.columns(model)?;
        if !self.only.is_empty() {
            let only = self.level_entries(&self.only, model, path)?;
            Ok(all
                .into_iter()
                .filter(|c| needed.contains(c) || only.contains(c))
                .collect())
        } else {
            let defer = self.level_entries(&self.defer, model, path)?;
            Ok(all
                .into_iter()
                .filter(|c| needed.contains(c) || !defer.contains(c))
                .collect())
        }
    }

    fn joins(&self, model: &str, path: &str, tree: &JoinTree) -> SealResult<Vec<JoinRequest>> {
        let mut out = Vec::new();
        for (hop, subtree) in tree.children() {
            let rel = self.registry.relation(model, hop)?;
            if !matches!(
                rel.kind,
                RelationKind::ForwardManyToOne
                    | RelationKind::ForwardOneToOne
                    | RelationKind::ReverseOneToOne
            ) {
                return Err(SealError::usage(format!(
                    "Invalid field name given in select_related: '{hop}'. \
                     Only single-valued relations can be joined"
                )));
            }
            let target = rel.target_model()?;
            let child_path = if path.is_empty() {
                hop.to_string()
            } else {
                format!("{path}{LOOKUP_SEP}{hop}")
            };
            out.push(JoinRequest {
                relation: rel.clone(),
                model: self.registry.model(target)?.concrete_model().to_string(),
                columns: self.level_columns(target, &child_path, subtree)?,
                joins: self.joins(target, &child_path, subtree)?,
            });
        }
        Ok(out)
    }

    // ==================== Execution ====================

    /// Fetch every matching record.
    ///
    /// Sealed querysets stamp each record and the records reachable through
    /// the eager-join tree, then run their (rewritten) prefetch lookups.
    pub fn fetch_all<B: crate::Backend>(&self, session: &Session<B>) -> SealResult<Vec<Record>> {
        if self.shape != ResultShape::Records {
            return Err(SealError::usage(
                "Projected querysets are fetched with fetch_values() or fetch_values_list()",
            ));
        }
        let request = self.to_request()?;
        let rows = session.fetch(&request)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(materialize(&self.registry, &self.model, row)?);
        }

        let sealed = self.is_sealed();
        let lookups = if sealed {
            records = SealingIter::new(records.into_iter(), self.select_related.clone()).collect();
            prefetch::normalize(self)?
        } else {
            self.prefetch.clone()
        };
        if !lookups.is_empty() {
            prefetch::prefetch_related_objects(session, &records, &lookups, sealed)?;
        }
        Ok(records)
    }

    /// Fetch exactly one record.
    pub fn get<B: crate::Backend>(&self, session: &Session<B>) -> SealResult<Record> {
        let mut records = self.fetch_all(session)?;
        match records.len() {
            0 => Err(SealError::does_not_exist(format!(
                "{} matching query does not exist.",
                self.model
            ))),
            1 => Ok(records.remove(0)),
            n => Err(SealError::MultipleObjects(format!(
                "get() returned more than one {} -- it returned {n}!",
                self.model
            ))),
        }
    }

    /// Fetch the first record (by primary key unless ordered).
    pub fn first<B: crate::Backend>(&self, session: &Session<B>) -> SealResult<Option<Record>> {
        let mut query = self.clone();
        if query.ordering.is_empty() {
            query = query.order_by("pk");
        }
        Ok(query.limit(1).fetch_all(session)?.into_iter().next())
    }

    /// Fetch projected rows keyed by field name.
    pub fn fetch_values<B: crate::Backend>(&self, session: &Session<B>) -> SealResult<Vec<Row>> {
        let fields = match &self.shape {
            ResultShape::Values(fields) | ResultShape::ValuesList(fields) => fields.clone(),
            ResultShape::Records => {
                return Err(SealError::usage(
                    "fetch_values() requires .values() or .values_list()",
                ));
            }
        };
        let request = self.to_request()?;
        let rows = session.fetch(&request)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                if fields.is_empty() {
                    return row.values;
                }
                fields
                    .iter()
                    .zip(&request.columns)
                    .map(|(field, column)| {
                        (field.clone(), row.values.get(column).cloned().unwrap_or(Value::Null))
                    })
                    .collect()
            })
            .collect())
    }

    /// Fetch projected tuples in field order.
    pub fn fetch_values_list<B: crate::Backend>(
        &self,
        session: &Session<B>,
    ) -> SealResult<Vec<Vec<Value>>> {
        let request = self.to_request()?;
        let rows = self.fetch_values(session)?;
        let names: Vec<String> = match &self.shape {
            ResultShape::ValuesList(fields) | ResultShape::Values(fields) if !fields.is_empty() => {
                fields.clone()
            }
            _ => request.columns,
        };
        Ok(rows
            .into_iter()
            .map(|row| {
                names
                    .iter()
                    .map(|n| row.get(n).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect())
    }
}

/// Resolve an attribute to the column it reads.
pub(crate) fn column_for(registry: &Registry, model: &str, field: &str) -> SealResult<String> {
    match registry.accessor(model, field)?.descriptor() {
        Descriptor::Field(f) => Ok(f.column.clone()),
        Descriptor::Relation(r) if r.kind.is_forward() && r.kind != RelationKind::GenericForeignKey => {
            Ok(r.column.clone())
        }
        Descriptor::Relation(_) => Err(SealError::usage(format!(
            "Cannot resolve '{field}' on {model} to a column"
        ))),
    }
}

/// Build a record (and its joined records) from a fetched row.
pub(crate) fn materialize(registry: &Registry, model: &str, row: FetchedRow) -> SealResult<Record> {
    let record = registry.instantiate(model, row.values)?;
    record.set_annotations(row.annotations);
    for (name, joined) in row.joined {
        let rel = registry.relation(model, &name)?;
        let child = match joined {
            Some(child) => Some(materialize(registry, rel.target_model()?, child)?),
            None => None,
        };
        if let Some(child) = &child {
            cache_back_reference(rel, child, &record);
        }
        record.cache(name, Cached::One(child));
    }
    Ok(record)
}

/// Point `related` back at `owner` across a one-to-one, or from the child
/// side of a reverse many-to-one.
pub(crate) fn cache_back_reference(rel: &RelationDescriptor, related: &Record, owner: &Record) {
    let single_back = matches!(
        rel.kind,
        RelationKind::ForwardOneToOne
            | RelationKind::ReverseOneToOne
            | RelationKind::ReverseManyToOne
    );
    if single_back && let Some(back) = &rel.reverse_accessor {
        related.cache_owner(back.clone(), owner);
    }
}
