use crate::backend::Backend;
use crate::descriptor::FieldDescriptor;
use crate::error::{SealError, SealResult, UnsealedAttributeAccess};
use crate::record::{Cached, Record, Value};
use crate::registry::Registry;
use crate::session::Session;

pub(super) fn read<B: Backend>(
    record: &Record,
    session: &Session<B>,
    field: &FieldDescriptor,
    guarded: bool,
) -> SealResult<Value> {
    if let Some(value) = record.resident(&field.column) {
        return Ok(value);
    }
    if let Some(value) = parent_chain(session.registry(), record, field)? {
        return Ok(value);
    }

    if guarded && record.is_sealed() {
        session.report(
            UnsealedAttributeAccess::deferred_field(&field.name, record.model()),
            record,
        )?;
    }

    let pk = record.pk().ok_or_else(|| {
        SealError::usage(format!(
            "Cannot load deferred field '{}' on an unsaved {}",
            field.name,
            record.model()
        ))
    })?;
    let fresh = session
        .registry()
        .base(record.model())?
        .filter("pk", pk)
        .only([field.name.as_str()])
        .get(session)?;
    let value = fresh.resident(&field.column).unwrap_or(Value::Null);
    record.set_value(field.column.clone(), value.clone());
    Ok(value)
}

/// Values an inherited record already holds without a fetch: an ancestor's
/// primary key is mirrored by the record's own key, and ancestors cached
/// through parent links may hold the column.
fn parent_chain(
    registry: &Registry,
    record: &Record,
    field: &FieldDescriptor,
) -> SealResult<Option<Value>> {
    if field.model == record.concrete_model() {
        return Ok(None);
    }
    if field.primary_key && let Some(pk) = record.pk() {
        return Ok(Some(pk));
    }

    let mut current = record.clone();
    loop {
        let meta = registry.model(current.concrete_model())?;
        let Some(link) = meta.parent_link() else {
            return Ok(None);
        };
        let Some(Cached::One(Some(parent))) = current.cached(link) else {
            return Ok(None);
        };
        if let Some(value) = parent.resident(&field.column) {
            return Ok(Some(value));
        }
        current = parent;
    }
}
