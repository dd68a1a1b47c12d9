use crate::descriptor::Descriptor;
use std::sync::Arc;

/// Attribute accessor installed on a model.
///
/// Plain accessors behave as the host ORM would. Guarded accessors consult
/// the record's seal state before letting a lazy fetch through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessor {
    descriptor: Arc<Descriptor>,
    guarded: bool,
}

impl Accessor {
    /// A plain (unguarded) accessor.
    pub fn plain(descriptor: Descriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            guarded: false,
        }
    }

    /// Swap in the guarded variant. Returns `false` if it already was guarded.
    pub fn guard(&mut self) -> bool {
        !std::mem::replace(&mut self.guarded, true)
    }

    /// Whether sealed records get their lazy fetches reported.
    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    /// Metadata shared by all records of the model.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}
