//! Seal propagation over fetched records.

use crate::query::JoinTree;
use crate::record::{Cached, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterState {
    NotStarted,
    Iterating,
    Exhausted,
}

/// Iterator adapter stamping each produced record sealed, together with the
/// records its eager joins put in the relation cache.
#[derive(Debug)]
pub struct SealingIter<I> {
    inner: I,
    joins: JoinTree,
    state: IterState,
}

impl<I: Iterator<Item = Record>> SealingIter<I> {
    /// Wrap `inner`; `joins` is the eager-join tree of the producing query.
    pub fn new(inner: I, joins: JoinTree) -> Self {
        Self {
            inner,
            joins,
            state: IterState::NotStarted,
        }
    }

    /// Whether the underlying iterator ran out.
    pub fn is_exhausted(&self) -> bool {
        self.state == IterState::Exhausted
    }
}

impl<I: Iterator<Item = Record>> Iterator for SealingIter<I> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.state == IterState::Exhausted {
            return None;
        }
        self.state = IterState::Iterating;
        match self.inner.next() {
            Some(record) => {
                record.seal();
                seal_joined(&record, &self.joins);
                Some(record)
            }
            None => {
                self.state = IterState::Exhausted;
                None
            }
        }
    }
}

fn seal_joined(record: &Record, joins: &JoinTree) {
    for (name, subtree) in joins.children() {
        if let Some(Cached::One(Some(related))) = record.cached(name) {
            related.seal();
            seal_joined(&related, subtree);
        }
    }
}
