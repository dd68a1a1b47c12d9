//! The fetch boundary with the host ORM.
//!
//! The crate never talks to a database. It lowers a [`QuerySet`](crate::QuerySet)
//! into a [`FetchRequest`] with resolved column names and hands it to a
//! [`Backend`], which returns plain rows.

use crate::descriptor::{LinkTable, RelationDescriptor};
use crate::error::SealResult;
use crate::record::{Row, Value};
use crate::registry::Registry;
use std::collections::BTreeMap;

/// Annotation carrying the owner key of a row fetched through a link table.
pub const OWNER_ANNOTATION: &str = "__seal_owner";

/// A row filter over resolved column names.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value` (`IS NULL` for a null value).
    Eq { column: String, value: Value },
    /// `column IN (values)`.
    In { column: String, values: Vec<Value> },
    /// Negation.
    Not(Box<Condition>),
    /// Rows linked from any of `owners` through a link table. Each produced
    /// row is annotated with [`OWNER_ANNOTATION`]; a row linked from several
    /// owners is produced once per owner.
    Through { link: LinkTable, owners: Vec<Value> },
}

/// One eager join of a fetch, resolved against the joined model.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    /// Relation being followed from the parent level.
    pub relation: RelationDescriptor,
    /// Concrete model of the joined rows.
    pub model: String,
    /// Columns to load on the joined rows.
    pub columns: Vec<String>,
    /// Nested joins.
    pub joins: Vec<JoinRequest>,
}

/// A fully resolved fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Concrete model of the produced rows.
    pub model: String,
    /// Conjunction of filters.
    pub conditions: Vec<Condition>,
    /// `(column, descending)` pairs; empty means primary key order.
    pub ordering: Vec<(String, bool)>,
    /// Rows to skip.
    pub offset: usize,
    /// Maximum number of rows.
    pub limit: Option<usize>,
    /// Columns to load.
    pub columns: Vec<String>,
    /// Eager joins.
    pub joins: Vec<JoinRequest>,
    /// Optional tag for observability.
    pub tag: Option<String>,
}

/// A row produced by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedRow {
    /// Loaded columns; anything missing is deferred.
    pub values: Row,
    /// Joined rows per relation name, `None` for an empty optional join.
    pub joined: BTreeMap<String, Option<FetchedRow>>,
    /// Extra values that are not columns.
    pub annotations: Row,
}

impl FetchedRow {
    /// A row with the given columns and no joins.
    pub fn new(values: Row) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }
}

/// Executes fetch requests for the host ORM.
pub trait Backend {
    /// Run a request and return its rows in order.
    fn fetch(&self, registry: &Registry, request: &FetchRequest) -> SealResult<Vec<FetchedRow>>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn fetch(&self, registry: &Registry, request: &FetchRequest) -> SealResult<Vec<FetchedRow>> {
        (**self).fetch(registry, request)
    }
}

impl<B: Backend + ?Sized> Backend for std::rc::Rc<B> {
    fn fetch(&self, registry: &Registry, request: &FetchRequest) -> SealResult<Vec<FetchedRow>> {
        (**self).fetch(registry, request)
    }
}
