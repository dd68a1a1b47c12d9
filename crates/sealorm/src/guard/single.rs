use crate::backend::Backend;
use crate::descriptor::{RelationDescriptor, RelationKind};
use crate::error::{SealError, SealResult, UnsealedAttributeAccess};
use crate::query::cache_back_reference;
use crate::record::{Cached, Record, Row, Value};
use crate::session::Session;

pub(super) fn read<B: Backend>(
    record: &Record,
    session: &Session<B>,
    rel: &RelationDescriptor,
    guarded: bool,
) -> SealResult<Option<Record>> {
    let propagate = guarded && record.is_sealed();

    match record.cached(&rel.name) {
        Some(Cached::One(Some(related))) => {
            if propagate {
                related.seal();
            }
            return Ok(Some(related));
        }
        Some(Cached::One(None)) => {
            return match rel.kind {
                RelationKind::ReverseOneToOne => Err(no_related(record, rel)),
                _ => Ok(None),
            };
        }
        Some(Cached::Many(_)) | None => {}
    }

    let related = match rel.kind {
        RelationKind::ForwardManyToOne | RelationKind::ForwardOneToOne => {
            forward(record, session, rel, guarded)?
        }
        RelationKind::ReverseOneToOne => reverse_one_to_one(record, session, rel, guarded)?,
        RelationKind::GenericForeignKey => generic(record, session, rel, guarded)?,
        other => {
            return Err(SealError::usage(format!(
                "'{}' is a {other:?} relation and cannot be read as a single record",
                rel.name
            )));
        }
    };

    if let Some(related) = &related {
        if propagate {
            related.seal();
        }
        cache_back_reference(rel, related, record);
    }
    record.cache(rel.name.clone(), Cached::One(related.clone()));
    Ok(related)
}

fn report<B: Backend>(
    record: &Record,
    session: &Session<B>,
    rel: &RelationDescriptor,
    guarded: bool,
) -> SealResult<()> {
    if guarded && record.is_sealed() {
        session.report(
            UnsealedAttributeAccess::related_field(&rel.name, record.model()),
            record,
        )?;
    }
    Ok(())
}

fn no_related(record: &Record, rel: &RelationDescriptor) -> SealError {
    SealError::does_not_exist(format!("{} has no {}.", record.model(), rel.name))
}

fn forward<B: Backend>(
    record: &Record,
    session: &Session<B>,
    rel: &RelationDescriptor,
    guarded: bool,
) -> SealResult<Option<Record>> {
    let registry = session.registry();
    let target = rel.target_model()?;

    if rel.parent_link
        && let Some(parent) = parent_from_local(record, session, target)?
    {
        return Ok(Some(parent));
    }

    let fk = record.value(session, &rel.column)?;
    if fk.is_null() {
        return Ok(None);
    }

    report(record, session, rel, guarded)?;
    registry.base(target)?.filter("pk", fk).get(session).map(Some)
}

/// Build the parent of an inherited record from the columns it already holds.
fn parent_from_local<B: Backend>(
    record: &Record,
    session: &Session<B>,
    target: &str,
) -> SealResult<Option<Record>> {
    let registry = session.registry();
    let ancestor_keys: Vec<String> = registry
        .ancestors(record.model())?
        .iter()
        .map(|m| m.pk().to_string())
        .collect();

    let mut row = Row::new();
    for column in registry.columns(target)? {
        let value = match record.resident(&column) {
            Some(value) => value,
            None if ancestor_keys.contains(&column) => match record.pk() {
                Some(pk) => pk,
                None => return Ok(None),
            },
            None => return Ok(None),
        };
        row.insert(column, value);
    }
    let parent = registry.instantiate(target, row)?;
    if record.is_sealed() {
        parent.seal();
    }
    Ok(Some(parent))
}

fn reverse_one_to_one<B: Backend>(
    record: &Record,
    session: &Session<B>,
    rel: &RelationDescriptor,
    guarded: bool,
) -> SealResult<Option<Record>> {
    let Some(pk) = record.pk() else {
        return Err(no_related(record, rel));
    };
    report(record, session, rel, guarded)?;

    let mut found = session
        .registry()
        .base(rel.target_model()?)?
        .filter(rel.column.clone(), pk)
        .fetch_all(session)?;
    match found.len() {
        0 => {
            record.cache(rel.name.clone(), Cached::One(None));
            Err(no_related(record, rel))
        }
        1 => Ok(Some(found.remove(0))),
        n => Err(SealError::MultipleObjects(format!(
            "{} has {n} related {} records",
            record.model(),
            rel.name
        ))),
    }
}

fn generic<B: Backend>(
    record: &Record,
    session: &Session<B>,
    rel: &RelationDescriptor,
    guarded: bool,
) -> SealResult<Option<Record>> {
    let Some(columns) = &rel.generic else {
        return Err(SealError::configuration(format!(
            "generic relation '{}' has no type and id columns",
            rel.name
        )));
    };
    let ct = record.value(session, &columns.ct_field)?;
    let id = record.value(session, &columns.fk_field)?;
    let (Value::String(model), false) = (ct, id.is_null()) else {
        return Ok(None);
    };

    report(record, session, rel, guarded)?;
    Ok(session
        .registry()
        .base(&model)?
        .filter("pk", id)
        .fetch_all(session)?
        .into_iter()
        .next())
}
