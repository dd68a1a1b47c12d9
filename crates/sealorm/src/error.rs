//! Error types for sealorm

use std::fmt;
use thiserror::Error;

/// Result type alias for sealorm operations
pub type SealResult<T> = Result<T, SealError>;

/// What kind of data a sealed access tried to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViolationKind {
    /// A column that was excluded from the initial fetch.
    DeferredField,
    /// A single related record (forward/reverse reference, parent link, generic reference).
    RelatedField,
    /// A related collection (reverse reference, many-to-many, generic relation).
    ManyToManyField,
}

impl ViolationKind {
    /// Human readable label used in violation messages.
    pub fn label(self) -> &'static str {
        match self {
            ViolationKind::DeferredField => "deferred field",
            ViolationKind::RelatedField => "related field",
            ViolationKind::ManyToManyField => "many-to-many field",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A guarded access on a sealed record that would have issued a query.
///
/// The same value is used for hard failures (wrapped in [`SealError::Unsealed`])
/// and for advisory reports delivered to violation monitors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Attempt to fetch {kind} \"{name}\" on sealed <{model} instance>")]
pub struct UnsealedAttributeAccess {
    /// Nature of the omission.
    pub kind: ViolationKind,
    /// Offending field or relation name.
    pub name: String,
    /// Type name of the sealed record.
    pub model: String,
}

impl UnsealedAttributeAccess {
    /// Create a violation report.
    pub fn new(kind: ViolationKind, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            model: model.into(),
        }
    }

    /// Report for a deferred column.
    pub fn deferred_field(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(ViolationKind::DeferredField, name, model)
    }

    /// Report for a single-valued relation.
    pub fn related_field(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(ViolationKind::RelatedField, name, model)
    }

    /// Report for a collection relation.
    pub fn many_to_many_field(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(ViolationKind::ManyToManyField, name, model)
    }
}

/// Error types for sealing operations
#[derive(Debug, Error)]
pub enum SealError {
    /// Hard failure: a sealed record was about to fetch data lazily
    #[error(transparent)]
    Unsealed(#[from] UnsealedAttributeAccess),

    /// Programmer error (invalid call sequence, invalid lookup)
    #[error("Usage error: {0}")]
    Usage(String),

    /// Model name not declared in the registry
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Attribute not declared on the model
    #[error("Unknown attribute '{name}' on {model}")]
    UnknownAttribute { model: String, name: String },

    /// A single related record (or a `get()` target) does not exist
    #[error("Does not exist: {0}")]
    DoesNotExist(String),

    /// A `get()` matched more than one record
    #[error("Multiple objects returned: {0}")]
    MultipleObjects(String),

    /// Invalid model declarations
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error raised by the fetch backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// Snapshot (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SealError {
    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create a does-not-exist error
    pub fn does_not_exist(message: impl Into<String>) -> Self {
        Self::DoesNotExist(message.into())
    }

    /// Create an unknown attribute error
    pub fn unknown_attribute(model: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            model: model.into(),
            name: name.into(),
        }
    }

    /// Check if this is a sealed access violation
    pub fn is_unsealed(&self) -> bool {
        matches!(self, Self::Unsealed(_))
    }

    /// Check if this is a usage error
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Check if this is a does-not-exist error
    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::DoesNotExist(_))
    }

    /// Borrow the violation if this is a sealed access failure
    pub fn violation(&self) -> Option<&UnsealedAttributeAccess> {
        match self {
            Self::Unsealed(v) => Some(v),
            _ => None,
        }
    }
}
