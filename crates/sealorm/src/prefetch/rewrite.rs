use crate::error::{SealError, SealResult};
use crate::query::{JoinTree, LOOKUP_SEP, Prefetch, QuerySet, ResultShape, SealIntent};
use crate::registry::Registry;
use std::sync::Arc;

/// Rewrite the prefetch lookups of a sealed queryset.
///
/// Lookups without a queryset become `Prefetch(head, <default queryset of the
/// head's target>.prefetch_related(tail))` where `head` runs up to the first
/// hop not covered by the eager-join tree. Explicit querysets are sealed
/// unless the caller decided otherwise. Lookups through generic foreign keys
/// are kept as-is. Rewritten lookups sharing a head are merged.
pub(crate) fn normalize(query: &QuerySet) -> SealResult<Vec<Prefetch>> {
    let mut out = Vec::with_capacity(query.prefetch.len());
    for lookup in &query.prefetch {
        let lookup = match &lookup.query {
            None => expand(&query.registry, &query.model, &query.select_related, lookup)?
                .unwrap_or_else(|| lookup.clone()),
            Some(explicit) => {
                let mut lookup = lookup.clone();
                if explicit.intent == SealIntent::Undecided
                    && explicit.sealable
                    && explicit.shape == ResultShape::Records
                {
                    lookup.query = Some(explicit.clone().seal()?);
                }
                lookup
            }
        };
        out.push(lookup);
    }
    merge(out)
}

/// Expand a lookup without a queryset. `None` for generic foreign keys.
fn expand(
    registry: &Arc<Registry>,
    model: &str,
    joins: &JoinTree,
    lookup: &Prefetch,
) -> SealResult<Option<Prefetch>> {
    let parts: Vec<&str> = lookup.through.split(LOOKUP_SEP).collect();
    let mut model = model.to_string();
    let mut tree = Some(joins);
    let mut index = 0;
    let mut related = None;
    for part in &parts {
        index += 1;
        let rel = registry.relation(&model, part)?;
        related = rel.target.clone();
        tree = tree.and_then(|t| t.get(part));
        match (&related, tree) {
            (Some(target), Some(_)) => model = target.clone(),
            _ => break,
        }
    }
    let Some(target) = related else {
        return Ok(None);
    };

    let head = parts[..index].join(LOOKUP_SEP);
    let tail = parts[index..].join(LOOKUP_SEP);
    let (to_attr, nested) = if tail.is_empty() {
        (lookup.to_attr.clone(), None)
    } else {
        let mut nested = Prefetch::new(tail);
        nested.to_attr = lookup.to_attr.clone();
        (None, Some(nested))
    };

    let mut sub = registry.objects(&target)?;
    if let Some(nested) = nested {
        sub = sub.prefetch_related([nested]);
    }
    let sub = if sub.sealable { sub.seal()? } else { sub };

    Ok(Some(Prefetch {
        through: head,
        query: Some(sub),
        to_attr,
        expanded: true,
    }))
}

/// Merge lookups sharing the same path and attribute.
fn merge(lookups: Vec<Prefetch>) -> SealResult<Vec<Prefetch>> {
    let mut out: Vec<Prefetch> = Vec::with_capacity(lookups.len());
    for lookup in lookups {
        match out
            .iter_mut()
            .find(|p| p.through == lookup.through && p.to_attr == lookup.to_attr)
        {
            Some(existing) => combine(existing, lookup)?,
            None => out.push(lookup),
        }
    }
    Ok(out)
}

fn combine(existing: &mut Prefetch, other: Prefetch) -> SealResult<()> {
    let (mut kept, absorbed) = match (existing.query.take(), other.query) {
        (None, None) => return Ok(()),
        (Some(a), Some(b)) if existing.expanded && other.expanded => (a, b),
        (Some(a), Some(b)) if existing.expanded => {
            existing.expanded = false;
            (b, a)
        }
        (Some(a), Some(b)) if other.expanded => (a, b),
        (a, _) => {
            existing.query = a;
            return Err(SealError::usage(format!(
                "'{}' lookup was already seen with a different queryset. \
                 You may need to adjust the ordering of your lookups.",
                existing.through
            )));
        }
    };
    let mut nested = std::mem::take(&mut kept.prefetch);
    nested.extend(absorbed.prefetch);
    kept.prefetch = merge(nested)?;
    existing.query = Some(kept);
    Ok(())
}
