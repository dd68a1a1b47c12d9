use crate::backend::{Backend, OWNER_ANNOTATION};
use crate::descriptor::{RelationDescriptor, RelationKind};
use crate::error::{SealError, SealResult};
use crate::query::{LOOKUP_SEP, Prefetch, QuerySet, SealIntent, cache_back_reference};
use crate::record::{Cached, Record, Value};
use crate::session::Session;
use std::collections::{BTreeMap, BTreeSet};

/// Resolve `lookups` for `records` with one fetch per relation hop (one per
/// target model for generic foreign keys).
///
/// Hops already present in the relation caches (eager joins, earlier lookups)
/// are walked without fetching. Results land in each owner's cache under the
/// relation's prefetch identity, or under the lookup's `to_attr`. When
/// `sealed` is set, querysets built here for intermediate hops and generic
/// foreign keys are sealed.
pub fn prefetch_related_objects<B: Backend>(
    session: &Session<B>,
    records: &[Record],
    lookups: &[Prefetch],
    sealed: bool,
) -> SealResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut done: BTreeSet<String> = BTreeSet::new();
    for lookup in lookups {
        let prefetch_to = lookup.prefetch_to();
        if done.contains(&prefetch_to) {
            if lookup.query.is_some() {
                return Err(SealError::usage(format!(
                    "'{}' lookup was already seen with a different queryset. \
                     You may need to adjust the ordering of your lookups.",
                    lookup.through
                )));
            }
            continue;
        }

        let hops: Vec<&str> = lookup.through.split(LOOKUP_SEP).collect();
        let mut level: Vec<Record> = records.to_vec();
        for (depth, hop) in hops.iter().enumerate() {
            if level.is_empty() {
                break;
            }
            let last = depth + 1 == hops.len();
            let to_attr = if last { lookup.to_attr.as_deref() } else { None };
            let path = hops[..=depth].join(LOOKUP_SEP);

            let query = if last { lookup.query.as_ref() } else { None };
            if !all_cached(session, &level, hop, to_attr)? {
                fetch_hop(session, &level, hop, query, to_attr, sealed)?;
            } else if let Some(query) = query
                && !query.prefetch.is_empty()
            {
                // Served by the cache; the nested lookups still apply.
                let next = traverse(session, &level, hop, to_attr)?;
                prefetch_related_objects(session, &next, &query.prefetch, query.is_sealed())?;
            }
            done.insert(if last { prefetch_to.clone() } else { path });
            level = traverse(session, &level, hop, to_attr)?;
        }
    }
    Ok(())
}

fn cache_key(rel: &RelationDescriptor, to_attr: Option<&str>) -> String {
    match to_attr {
        Some(attr) => attr.to_string(),
        None if rel.kind.is_single() => rel.name.clone(),
        None => rel.prefetch_key.clone(),
    }
}

fn all_cached<B: Backend>(
    session: &Session<B>,
    owners: &[Record],
    hop: &str,
    to_attr: Option<&str>,
) -> SealResult<bool> {
    for owner in owners {
        let rel = session.registry().relation(owner.model(), hop)?;
        let cached = match (owner.cached(&cache_key(rel, to_attr)), rel.kind.is_single()) {
            (Some(Cached::One(_)), true) | (Some(Cached::Many(_)), false) => true,
            _ => false,
        };
        if !cached {
            return Ok(false);
        }
    }
    Ok(true)
}

fn traverse<B: Backend>(
    session: &Session<B>,
    owners: &[Record],
    hop: &str,
    to_attr: Option<&str>,
) -> SealResult<Vec<Record>> {
    let mut next = Vec::new();
    for owner in owners {
        let rel = session.registry().relation(owner.model(), hop)?;
        match owner.cached(&cache_key(rel, to_attr)) {
            Some(Cached::One(Some(record))) => next.push(record),
            Some(Cached::Many(records)) => next.extend(records),
            _ => {}
        }
    }
    Ok(next)
}

/// Group key of a value (numbers compare by magnitude).
fn key(value: &Value) -> String {
    match value {
        Value::Number(n) => n.as_f64().map_or_else(|| n.to_string(), |f| f.to_string()),
        other => other.to_string(),
    }
}

fn unique(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|v| !v.is_null() && seen.insert(key(v)))
        .collect()
}

/// Default queryset for a hop without an explicit one.
fn default_query<B: Backend>(session: &Session<B>, target: &str, sealed: bool) -> SealResult<QuerySet> {
    let query = session.registry().objects(target)?;
    if sealed && query.is_sealable() && query.seal_intent() != SealIntent::Sealed {
        query.seal()
    } else {
        Ok(query)
    }
}

fn fetch_hop<B: Backend>(
    session: &Session<B>,
    owners: &[Record],
    hop: &str,
    query: Option<&QuerySet>,
    to_attr: Option<&str>,
    sealed: bool,
) -> SealResult<()> {
    let mut groups: BTreeMap<&str, Vec<Record>> = BTreeMap::new();
    for owner in owners {
        groups.entry(owner.model()).or_default().push(owner.clone());
    }

    for (model, group) in groups {
        let rel = session.registry().relation(model, hop)?;
        let key_name = cache_key(rel, to_attr);

        if rel.kind == RelationKind::GenericForeignKey {
            if query.is_some() {
                return Err(SealError::usage(format!(
                    "Custom queryset can't be used for the generic foreign key lookup '{hop}'"
                )));
            }
            generic_foreign_key(session, &group, rel, &key_name, sealed)?;
            continue;
        }

        let target = rel.target_model()?;
        let base = match query {
            Some(query) => query.clone(),
            None => default_query(session, target, sealed)?,
        };

        match rel.kind {
            RelationKind::ForwardManyToOne | RelationKind::ForwardOneToOne => {
                let mut fks = Vec::with_capacity(group.len());
                for owner in &group {
                    fks.push(owner.value(session, &rel.column)?);
                }
                let wanted = unique(fks.iter().cloned());
                let mut by_pk = BTreeMap::new();
                if !wanted.is_empty() {
                    for record in base.filter_in("pk", wanted).fetch_all(session)? {
                        if let Some(pk) = record.pk() {
                            by_pk.insert(key(&pk), record);
                        }
                    }
                }
                for (owner, fk) in group.iter().zip(&fks) {
                    let related = (!fk.is_null()).then(|| by_pk.get(&key(fk)).cloned()).flatten();
                    if let Some(related) = &related {
                        cache_back_reference(rel, related, owner);
                    }
                    owner.cache(key_name.clone(), Cached::One(related));
                }
            }
            RelationKind::ReverseOneToOne | RelationKind::ReverseManyToOne => {
                let pks = unique(group.iter().filter_map(Record::pk));
                let mut by_owner: BTreeMap<String, Vec<Record>> = BTreeMap::new();
                if !pks.is_empty() {
                    let fetched = base
                        .filter_in(rel.column.clone(), pks)
                        .require(rel.column.clone())
                        .fetch_all(session)?;
                    for record in fetched {
                        if let Some(owner_pk) = record.resident(&rel.column) {
                            by_owner.entry(key(&owner_pk)).or_default().push(record);
                        }
                    }
                }
                store(&group, rel, &key_name, by_owner);
            }
            RelationKind::ManyToMany => {
                let link = rel.link.clone().ok_or_else(|| {
                    SealError::configuration(format!("'{}' has no link table", rel.name))
                })?;
                let pks = unique(group.iter().filter_map(Record::pk));
                let mut by_owner: BTreeMap<String, Vec<Record>> = BTreeMap::new();
                if !pks.is_empty() {
                    for record in base.through(link, pks).fetch_all(session)? {
                        if let Some(owner_pk) = record.annotation(OWNER_ANNOTATION) {
                            by_owner.entry(key(&owner_pk)).or_default().push(record);
                        }
                    }
                }
                store(&group, rel, &key_name, by_owner);
            }
            RelationKind::GenericRelation => {
                let columns = rel.generic.clone().ok_or_else(|| {
                    SealError::configuration(format!("'{}' has no type and id columns", rel.name))
                })?;
                let pks = unique(group.iter().filter_map(Record::pk));
                let mut by_owner: BTreeMap<String, Vec<Record>> = BTreeMap::new();
                if !pks.is_empty() {
                    let concrete = session.registry().model(model)?.concrete_model().to_string();
                    let fetched = base
                        .filter(columns.ct_field.clone(), concrete)
                        .filter_in(columns.fk_field.clone(), pks)
                        .require(columns.fk_field.clone())
                        .fetch_all(session)?;
                    for record in fetched {
                        if let Some(owner_pk) = record.resident(&columns.fk_field) {
                            by_owner.entry(key(&owner_pk)).or_default().push(record);
                        }
                    }
                }
                store(&group, rel, &key_name, by_owner);
            }
            RelationKind::GenericForeignKey => {}
        }
    }
    Ok(())
}

fn store(
    owners: &[Record],
    rel: &RelationDescriptor,
    key_name: &str,
    by_owner: BTreeMap<String, Vec<Record>>,
) {
    for owner in owners {
        let related = owner
            .pk()
            .and_then(|pk| by_owner.get(&key(&pk)).cloned())
            .unwrap_or_default();
        for child in &related {
            cache_back_reference(rel, child, owner);
        }
        let entry = if rel.kind.is_single() {
            Cached::One(related.into_iter().next())
        } else {
            Cached::Many(related)
        };
        owner.cache(key_name.to_string(), entry);
    }
}

fn generic_foreign_key<B: Backend>(
    session: &Session<B>,
    owners: &[Record],
    rel: &RelationDescriptor,
    key_name: &str,
    sealed: bool,
) -> SealResult<()> {
    let columns = rel.generic.clone().ok_or_else(|| {
        SealError::configuration(format!("'{}' has no type and id columns", rel.name))
    })?;

    let mut refs = Vec::with_capacity(owners.len());
    let mut wanted: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for owner in owners {
        let ct = owner.value(session, &columns.ct_field)?;
        let id = owner.value(session, &columns.fk_field)?;
        match (ct, id.is_null()) {
            (Value::String(model), false) => {
                wanted.entry(model.clone()).or_default().push(id.clone());
                refs.push(Some((model, id)));
            }
            _ => refs.push(None),
        }
    }

    let mut found: BTreeMap<(String, String), Record> = BTreeMap::new();
    for (model, ids) in wanted {
        let fetched = default_query(session, &model, sealed)?
            .filter_in("pk", unique(ids))
            .fetch_all(session)?;
        for record in fetched {
            if let Some(pk) = record.pk() {
                found.insert((model.clone(), key(&pk)), record);
            }
        }
    }

    for (owner, reference) in owners.iter().zip(refs) {
        let related = reference.and_then(|(model, id)| found.get(&(model, key(&id))).cloned());
        owner.cache(key_name.to_string(), Cached::One(related));
    }
    Ok(())
}
