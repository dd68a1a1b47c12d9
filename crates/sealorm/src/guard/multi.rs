use crate::backend::Backend;
use crate::descriptor::{RelationDescriptor, RelationKind};
use crate::error::{SealError, SealResult, UnsealedAttributeAccess};
use crate::query::QuerySet;
use crate::record::{Record, Value};
use crate::registry::Registry;
use crate::related_set::RelatedSet;
use crate::session::Session;
use std::sync::Arc;

pub(super) fn read<B: Backend>(
    record: &Record,
    session: &Session<B>,
    rel: &RelationDescriptor,
    guarded: bool,
) -> SealResult<RelatedSet> {
    let pk = record.pk().ok_or_else(|| {
        SealError::usage(format!(
            "{} instance needs to have a primary key value before '{}' can be used",
            record.model(),
            rel.name
        ))
    })?;
    let query = related_query(session.registry(), record, rel, pk)?;

    if let Some(records) = record.prefetched(&rel.prefetch_key) {
        return Ok(RelatedSet::prefetched(&rel.name, record, query, records));
    }
    let back = match rel.kind {
        RelationKind::ReverseManyToOne => rel.reverse_accessor.clone(),
        _ => None,
    };
    if guarded && record.is_sealed() {
        let violation = UnsealedAttributeAccess::many_to_many_field(&rel.name, record.model());
        let set = RelatedSet::restricted(&rel.name, record, query, violation);
        return Ok(set.with_back_reference(back));
    }
    Ok(RelatedSet::lazy(&rel.name, record, query).with_back_reference(back))
}

/// Queryset producing the members of `record`'s collection.
fn related_query(
    registry: &Arc<Registry>,
    record: &Record,
    rel: &RelationDescriptor,
    pk: Value,
) -> SealResult<QuerySet> {
    let target = rel.target_model()?;
    let objects = registry.objects(target)?;
    match (rel.kind, &rel.link, &rel.generic) {
        (RelationKind::ReverseManyToOne, _, _) => Ok(objects.filter(rel.column.clone(), pk)),
        (RelationKind::ManyToMany, Some(link), _) => Ok(objects.through(link.clone(), vec![pk])),
        (RelationKind::GenericRelation, _, Some(columns)) => Ok(objects
            .filter(columns.ct_field.clone(), record.concrete_model())
            .filter(columns.fk_field.clone(), pk)),
        (kind, _, _) => Err(SealError::usage(format!(
            "'{}' is a {kind:?} relation and has no collection",
            rel.name
        ))),
    }
}
