//! Immutable accessor metadata built once when the registry is assembled.

/// The closed set of relation shapes a record can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Local `<name>_id` column pointing at one target record.
    ForwardManyToOne,
    /// Local `<name>_id` column pointing at one target record, unique.
    /// Inheritance parent links are forward one-to-ones with `parent_link` set.
    ForwardOneToOne,
    /// The target holds a unique column pointing back at this record.
    ReverseOneToOne,
    /// The target holds a column pointing back at this record.
    ReverseManyToOne,
    /// Link-table backed collection, either direction.
    ManyToMany,
    /// Type + id pair pointing at any model.
    GenericForeignKey,
    /// Records of the target whose type + id pair points at this record.
    GenericRelation,
}

impl RelationKind {
    /// Whether accessing the relation yields a single record.
    pub fn is_single(self) -> bool {
        matches!(
            self,
            RelationKind::ForwardManyToOne
                | RelationKind::ForwardOneToOne
                | RelationKind::ReverseOneToOne
                | RelationKind::GenericForeignKey
        )
    }

    /// Whether the relation is stored as a local column on the owner.
    pub fn is_forward(self) -> bool {
        matches!(
            self,
            RelationKind::ForwardManyToOne
                | RelationKind::ForwardOneToOne
                | RelationKind::GenericForeignKey
        )
    }
}

/// Columns of the link table behind a many-to-many relation, oriented from
/// the owning side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    /// Link table name.
    pub table: String,
    /// Column holding the owner's primary key.
    pub source: String,
    /// Column holding the target's primary key.
    pub target: String,
}

impl LinkTable {
    /// The same table seen from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            table: self.table.clone(),
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

/// Columns of a polymorphic reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericColumns {
    /// Column holding the referenced model name.
    pub ct_field: String,
    /// Column holding the referenced primary key.
    pub fk_field: String,
}

/// Metadata describing one relation accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Accessor name on `model`.
    pub name: String,
    /// Relation shape.
    pub kind: RelationKind,
    /// Model owning the accessor.
    pub model: String,
    /// Related model, `None` for generic foreign keys.
    pub target: Option<String>,
    /// Column carrying the reference: local for forward relations, on the
    /// target for reverse relations and generic relations.
    pub column: String,
    /// Whether the reference column accepts nulls.
    pub nullable: bool,
    /// Inheritance parent link.
    pub parent_link: bool,
    /// Name of the declaring field (differs from `name` on reverse accessors).
    pub field_name: String,
    /// Relation cache key used by prefetching.
    pub prefetch_key: String,
    /// Accessor name on the other side, if any.
    pub reverse_accessor: Option<String>,
    /// Link table for many-to-many relations.
    pub link: Option<LinkTable>,
    /// Type + id columns for polymorphic relations.
    pub generic: Option<GenericColumns>,
    /// Symmetrical self-referential many-to-many.
    pub symmetrical: bool,
}

impl RelationDescriptor {
    /// The related model, or a configuration error for polymorphic references.
    pub(crate) fn target_model(&self) -> crate::SealResult<&str> {
        self.target.as_deref().ok_or_else(|| {
            crate::SealError::usage(format!(
                "'{}' is a generic relation and has no single related model",
                self.name
            ))
        })
    }
}

/// Metadata describing one column accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Attribute name.
    pub name: String,
    /// Column name.
    pub column: String,
    /// Model declaring the column (an ancestor for inherited columns).
    pub model: String,
    /// Whether this is the declaring model's primary key.
    pub primary_key: bool,
}

/// What an accessor reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// A column, possibly deferred.
    Field(FieldDescriptor),
    /// A relation to other records.
    Relation(RelationDescriptor),
}

impl Descriptor {
    /// Attribute name.
    pub fn name(&self) -> &str {
        match self {
            Descriptor::Field(f) => &f.name,
            Descriptor::Relation(r) => &r.name,
        }
    }

    /// Borrow the relation metadata, if any.
    pub fn as_relation(&self) -> Option<&RelationDescriptor> {
        match self {
            Descriptor::Relation(r) => Some(r),
            Descriptor::Field(_) => None,
        }
    }

    /// Borrow the field metadata, if any.
    pub fn as_field(&self) -> Option<&FieldDescriptor> {
        match self {
            Descriptor::Field(f) => Some(f),
            Descriptor::Relation(_) => None,
        }
    }
}
