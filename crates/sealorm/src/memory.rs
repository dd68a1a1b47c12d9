//! In-process reference backend.
//!
//! Stores one table per concrete model level (multi-table inheritance keeps
//! inherited columns in the ancestor's table), one table per many-to-many
//! link, and answers [`FetchRequest`]s the way a SQL host would.

use crate::backend::{Backend, Condition, FetchRequest, FetchedRow, JoinRequest, OWNER_ANNOTATION};
use crate::descriptor::RelationKind;
use crate::error::{SealError, SealResult};
use crate::record::{Row, Value};
use crate::registry::Registry;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<Row>>,
    links: BTreeMap<String, Vec<Row>>,
    next_ids: BTreeMap<String, i64>,
}

/// Backend keeping every row in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    registry: Arc<Registry>,
    state: RefCell<MemoryState>,
}

impl MemoryBackend {
    /// Create an empty store for the registry's models.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            state: RefCell::new(MemoryState::default()),
        }
    }

    // ==================== Writes ====================

    /// Insert a row and return its primary key.
    ///
    /// Missing columns are stored as null. The primary key is assigned from
    /// the root table's sequence unless given.
    pub fn insert(&self, model: &str, row: Row) -> SealResult<Value> {
        let registry = &self.registry;
        let concrete = registry.model(model)?.concrete_model().to_string();
        let columns = registry.columns(&concrete)?;
        if let Some(unknown) = row.keys().find(|k| !columns.contains(k)) {
            return Err(SealError::unknown_attribute(model, unknown.clone()));
        }

        let mut levels = registry.ancestors(&concrete)?;
        levels.reverse();
        levels.push(registry.model(&concrete)?);
        let root = levels[0].name().to_string();

        let given = levels
            .iter()
            .rev()
            .find_map(|level| row.get(level.pk()).filter(|v| !v.is_null()).cloned());

        let mut state = self.state.borrow_mut();
        let next = state.next_ids.entry(root).or_insert(1);
        let id = match given {
            Some(id) => {
                if let Some(n) = id.as_i64()
                    && n >= *next
                {
                    *next = n + 1;
                }
                id
            }
            None => {
                let id = Value::from(*next);
                *next += 1;
                id
            }
        };

        for level in &levels {
            let table = state.tables.entry(level.name().to_string()).or_default();
            if table
                .iter()
                .any(|r| r.get(level.pk()).is_some_and(|v| values_eq(v, &id)))
            {
                return Err(SealError::backend(format!(
                    "duplicate primary key {id} for {}",
                    level.name()
                )));
            }
            let mut stored = Row::new();
            for column in level.local_columns() {
                let value = if column == level.pk() {
                    id.clone()
                } else {
                    row.get(column).cloned().unwrap_or(Value::Null)
                };
                stored.insert(column.clone(), value);
            }
            table.push(stored);
        }
        Ok(id)
    }

    /// Overwrite one column of a stored row.
    pub fn update(
        &self,
        model: &str,
        pk: impl Into<Value>,
        column: &str,
        value: impl Into<Value>,
    ) -> SealResult<()> {
        let pk = pk.into();
        let registry = &self.registry;
        let concrete = registry.model(model)?.concrete_model().to_string();
        let mut levels = registry.ancestors(&concrete)?;
        levels.push(registry.model(&concrete)?);
        let level = levels
            .into_iter()
            .find(|l| l.local_columns().iter().any(|c| c == column))
            .ok_or_else(|| SealError::unknown_attribute(model, column))?;

        let mut state = self.state.borrow_mut();
        let row = state
            .tables
            .get_mut(level.name())
            .and_then(|t| {
                t.iter_mut()
                    .find(|r| r.get(level.pk()).is_some_and(|v| values_eq(v, &pk)))
            })
            .ok_or_else(|| SealError::backend(format!("no {model} row with primary key {pk}")))?;
        row.insert(column.to_string(), value.into());
        Ok(())
    }

    /// Add a many-to-many link from `owner` to `target`.
    pub fn link(
        &self,
        model: &str,
        relation: &str,
        owner: impl Into<Value>,
        target: impl Into<Value>,
    ) -> SealResult<()> {
        let rel = self.registry.relation(model, relation)?;
        let (RelationKind::ManyToMany, Some(link)) = (rel.kind, &rel.link) else {
            return Err(SealError::usage(format!(
                "'{relation}' on {model} is not a many-to-many relation"
            )));
        };
        let (owner, target) = (owner.into(), target.into());
        let mut state = self.state.borrow_mut();
        let rows = state.links.entry(link.table.clone()).or_default();
        let mut row = Row::new();
        row.insert(link.source.clone(), owner.clone());
        row.insert(link.target.clone(), target.clone());
        rows.push(row);
        if rel.symmetrical && !values_eq(&owner, &target) {
            let mut row = Row::new();
            row.insert(link.source.clone(), target);
            row.insert(link.target.clone(), owner);
            rows.push(row);
        }
        Ok(())
    }

    /// Number of stored rows of a model (children included for ancestors).
    pub fn len(&self, model: &str) -> usize {
        self.state
            .borrow()
            .tables
            .get(model)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether nothing is stored at all.
    pub fn is_empty(&self) -> bool {
        self.state.borrow().tables.values().all(Vec::is_empty)
    }

    // ==================== Reads ====================

    /// Full rows of a concrete model, inherited columns merged in.
    fn full_rows(&self, registry: &Registry, model: &str) -> SealResult<Vec<Row>> {
        let meta = registry.model(model)?;
        let state = self.state.borrow();
        let Some(own) = state.tables.get(meta.name()) else {
            return Ok(Vec::new());
        };
        let ancestors = registry.ancestors(model)?;
        let mut out = Vec::with_capacity(own.len());
        for row in own {
            let mut full = row.clone();
            let id = row.get(meta.pk()).cloned().unwrap_or(Value::Null);
            for ancestor in &ancestors {
                let parent_row = state.tables.get(ancestor.name()).and_then(|t| {
                    t.iter()
                        .find(|r| r.get(ancestor.pk()).is_some_and(|v| values_eq(v, &id)))
                });
                if let Some(parent_row) = parent_row {
                    for (k, v) in parent_row {
                        full.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            out.push(full);
        }
        Ok(out)
    }

    fn apply(
        &self,
        pk: &str,
        rows: Vec<(Row, Row)>,
        condition: &Condition,
    ) -> Vec<(Row, Row)> {
        match condition {
            Condition::Through { link, owners } => {
                let state = self.state.borrow();
                let links = state.links.get(&link.table).cloned().unwrap_or_default();
                drop(state);
                let mut out = Vec::new();
                for (row, annotations) in rows {
                    let Some(id) = row.get(pk) else { continue };
                    for owner in owners {
                        let linked = links.iter().any(|l| {
                            l.get(&link.source).is_some_and(|v| values_eq(v, owner))
                                && l.get(&link.target).is_some_and(|v| values_eq(v, id))
                        });
                        if linked {
                            let mut annotations = annotations.clone();
                            annotations.insert(OWNER_ANNOTATION.to_string(), owner.clone());
                            out.push((row.clone(), annotations));
                        }
                    }
                }
                out
            }
            other => rows.into_iter().filter(|(row, _)| matches(row, other)).collect(),
        }
    }

    fn joined(
        &self,
        registry: &Registry,
        row: &Row,
        owner_pk: &str,
        joins: &[JoinRequest],
    ) -> SealResult<BTreeMap<String, Option<FetchedRow>>> {
        let mut out = BTreeMap::new();
        for join in joins {
            let target_pk = registry.model(&join.model)?.pk().to_string();
            let (column, key) = match join.relation.kind {
                RelationKind::ForwardManyToOne | RelationKind::ForwardOneToOne => {
                    (target_pk.clone(), row.get(&join.relation.column))
                }
                RelationKind::ReverseOneToOne => (join.relation.column.clone(), row.get(owner_pk)),
                other => {
                    return Err(SealError::backend(format!(
                        "cannot join {other:?} relation '{}'",
                        join.relation.name
                    )));
                }
            };
            let found = match key.filter(|k| !k.is_null()) {
                Some(key) => self
                    .full_rows(registry, &join.model)?
                    .into_iter()
                    .find(|r| r.get(&column).is_some_and(|v| values_eq(v, key))),
                None => None,
            };
            let fetched = match found {
                Some(target) => Some(FetchedRow {
                    joined: self.joined(registry, &target, &target_pk, &join.joins)?,
                    values: project(&target, &join.columns),
                    annotations: Row::new(),
                }),
                None => None,
            };
            out.insert(join.relation.name.clone(), fetched);
        }
        Ok(out)
    }
}

impl Backend for MemoryBackend {
    fn fetch(&self, registry: &Registry, request: &FetchRequest) -> SealResult<Vec<FetchedRow>> {
        let pk = registry.model(&request.model)?.pk().to_string();

        let mut rows: Vec<(Row, Row)> = self
            .full_rows(registry, &request.model)?
            .into_iter()
            .map(|row| (row, Row::new()))
            .collect();
        for condition in &request.conditions {
            rows = self.apply(&pk, rows, condition);
        }

        let ordering = if request.ordering.is_empty() {
            vec![(pk.clone(), false)]
        } else {
            request.ordering.clone()
        };
        rows.sort_by(|(a, _), (b, _)| {
            for (column, desc) in &ordering {
                let ord = cmp_values(
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                );
                let ord = if *desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let rows = rows
            .into_iter()
            .skip(request.offset)
            .take(request.limit.unwrap_or(usize::MAX));
        let mut out = Vec::new();
        for (row, annotations) in rows {
            out.push(FetchedRow {
                joined: self.joined(registry, &row, &pk, &request.joins)?,
                values: project(&row, &request.columns),
                annotations,
            });
        }
        Ok(out)
    }
}

fn project(row: &Row, columns: &[String]) -> Row {
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

fn matches(row: &Row, condition: &Condition) -> bool {
    let get = |column: &str| row.get(column).unwrap_or(&Value::Null);
    match condition {
        Condition::Eq { column, value } => values_eq(get(column), value),
        Condition::In { column, values } => values.iter().any(|v| values_eq(get(column), v)),
        Condition::Not(inner) => !matches(row, inner),
        Condition::Through { .. } => true,
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ForeignKey, ManyToMany, ModelDef};
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        Registry::builder()
            .model(ModelDef::new("Location").fields(&["latitude", "longitude"]))
            .model(
                ModelDef::new("SeaLion")
                    .fields(&["height", "weight"])
                    .foreign_key(ForeignKey::new("location", "Location").null())
                    .many_to_many(
                        ManyToMany::new("previous_locations", "Location")
                            .related_name("previous_visitors"),
                    ),
            )
            .model(ModelDef::new("GreatSeaLion").parent("SeaLion").field("roar"))
            .build()
            .expect("registry")
    }

    fn row(values: serde_json::Value) -> Row {
        serde_json::from_value(values).expect("row")
    }

    #[test]
    fn insert_assigns_ids_and_fills_nulls() {
        let backend = MemoryBackend::new(registry());
        let a = backend.insert("Location", row(json!({"latitude": 1}))).unwrap();
        let b = backend.insert("Location", row(json!({"latitude": 2}))).unwrap();
        assert_eq!((a, b), (json!(1), json!(2)));
        assert_eq!(backend.len("Location"), 2);

        let err = backend.insert("Location", row(json!({"altitude": 2}))).unwrap_err();
        assert!(matches!(err, SealError::UnknownAttribute { .. }));
    }

    #[test]
    fn inherited_rows_are_split_per_level() {
        let registry = registry();
        let backend = MemoryBackend::new(registry.clone());
        backend.insert("SeaLion", row(json!({"height": 1}))).unwrap();
        let id = backend
            .insert("GreatSeaLion", row(json!({"height": 5, "roar": "loud"})))
            .unwrap();
        assert_eq!(id, json!(2));
        assert_eq!(backend.len("SeaLion"), 2);
        assert_eq!(backend.len("GreatSeaLion"), 1);

        let full = backend.full_rows(&registry, "GreatSeaLion").unwrap();
        assert_eq!(full[0]["height"], json!(5));
        assert_eq!(full[0]["sealion_ptr_id"], json!(2));
        assert_eq!(full[0]["id"], json!(2));
    }

    #[test]
    fn fetch_filters_orders_and_joins() {
        let registry = registry();
        let backend = MemoryBackend::new(registry.clone());
        let loc = backend.insert("Location", row(json!({"latitude": 3}))).unwrap();
        backend
            .insert("SeaLion", row(json!({"height": 2, "location_id": loc})))
            .unwrap();
        backend.insert("SeaLion", row(json!({"height": 1}))).unwrap();

        let request = registry
            .objects("SeaLion")
            .unwrap()
            .select_related(["location"])
            .order_by_desc("height")
            .to_request()
            .unwrap();
        let rows = backend.fetch(&registry, &request).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values["height"], json!(2));
        let joined = rows[0].joined["location"].as_ref().expect("joined location");
        assert_eq!(joined.values["latitude"], json!(3));
        assert_eq!(rows[1].joined["location"], None);
    }

    #[test]
    fn through_condition_annotates_owner() {
        let registry = registry();
        let backend = MemoryBackend::new(registry.clone());
        let l1 = backend.insert("Location", Row::new()).unwrap();
        let l2 = backend.insert("Location", Row::new()).unwrap();
        let s1 = backend.insert("SeaLion", Row::new()).unwrap();
        let s2 = backend.insert("SeaLion", Row::new()).unwrap();
        backend.link("SeaLion", "previous_locations", s1.clone(), l1.clone()).unwrap();
        backend.link("SeaLion", "previous_locations", s2.clone(), l1).unwrap();
        backend.link("SeaLion", "previous_locations", s2.clone(), l2).unwrap();

        let link = registry
            .relation("SeaLion", "previous_locations")
            .unwrap()
            .link
            .clone()
            .unwrap();
        let request = registry
            .objects("Location")
            .unwrap()
            .through(link, vec![s1.clone(), s2.clone()])
            .to_request()
            .unwrap();
        let rows = backend.fetch(&registry, &request).unwrap();
        let owners: Vec<_> = rows
            .iter()
            .map(|r| r.annotations[OWNER_ANNOTATION].clone())
            .collect();
        assert_eq!(owners, vec![s1, s2.clone(), s2]);
    }
}
