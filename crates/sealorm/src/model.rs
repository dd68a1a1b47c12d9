//! Model declarations.
//!
//! A [`ModelDef`] is the declaration-time description of a record type: its
//! columns, the relations it declares locally, its inheritance position and
//! whether it opts into sealing. Declarations are handed to a
//! [`RegistryBuilder`](crate::RegistryBuilder), which resolves relation targets
//! (in any declaration order) and builds the accessor tables.
//!
//! # Example
//!
//! ```ignore
//! use sealorm::{ForeignKey, ManyToMany, ModelDef, Registry};
//!
//! let registry = Registry::builder()
//!     .model(ModelDef::new("SeaLion")
//!         .sealable()
//!         .field("height")
//!         .field("weight")
//!         .foreign_key(ForeignKey::new("location", "Location").null().related_name("visitors"))
//!         .many_to_many(ManyToMany::new("previous_locations", "Location").related_name("previous_visitors")))
//!     .model(ModelDef::new("Location").sealable().field("latitude").field("longitude"))
//!     .build()?;
//! ```

/// Default primary key column for models without an explicit one.
pub const DEFAULT_PK: &str = "id";

/// Marks a reverse accessor as hidden when used as (or as a suffix of) `related_name`.
pub const HIDDEN_RELATED_NAME: &str = "+";

/// A plain column declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Column name.
    pub name: String,
    /// Whether this column is the primary key.
    pub primary_key: bool,
}

/// A forward many-to-one reference stored as a local `<name>_id` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub(crate) name: String,
    pub(crate) target: String,
    pub(crate) null: bool,
    pub(crate) related_name: Option<String>,
}

impl ForeignKey {
    /// Declare a reference `name` pointing at model `target` (`"self"` allowed).
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            null: false,
            related_name: None,
        }
    }

    /// Allow the stored identifier to be null.
    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    /// Name of the reverse collection accessor on the target (`"+"` hides it).
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }
}

/// A forward one-to-one reference stored as a local `<name>_id` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneToOne {
    pub(crate) name: String,
    pub(crate) target: String,
    pub(crate) null: bool,
    pub(crate) related_name: Option<String>,
}

impl OneToOne {
    /// Declare a one-to-one reference `name` pointing at model `target`.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            null: false,
            related_name: None,
        }
    }

    /// Allow the stored identifier to be null.
    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    /// Name of the reverse single accessor on the target (`"+"` hides it).
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }
}

/// A many-to-many relation backed by a link table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToMany {
    pub(crate) name: String,
    pub(crate) target: String,
    pub(crate) related_name: Option<String>,
    pub(crate) symmetrical: Option<bool>,
    pub(crate) through: Option<String>,
}

impl ManyToMany {
    /// Declare a collection `name` of `target` records (`"self"` allowed).
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            related_name: None,
            symmetrical: None,
            through: None,
        }
    }

    /// Name of the reverse collection accessor on the target (`"+"` hides it).
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }

    /// Whether a self-referential relation is symmetrical (default: true for `"self"`).
    pub fn symmetrical(mut self, symmetrical: bool) -> Self {
        self.symmetrical = Some(symmetrical);
        self
    }

    /// Override the link table name (default `<model>_<name>`).
    pub fn through(mut self, table: impl Into<String>) -> Self {
        self.through = Some(table.into());
        self
    }
}

/// A polymorphic reference made of a type column and an id column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericForeignKey {
    pub(crate) name: String,
    pub(crate) ct_field: String,
    pub(crate) fk_field: String,
}

impl GenericForeignKey {
    /// Declare a polymorphic reference using `content_type` / `object_id` columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ct_field: "content_type".to_string(),
            fk_field: "object_id".to_string(),
        }
    }

    /// Column holding the target model name.
    pub fn ct_field(mut self, field: impl Into<String>) -> Self {
        self.ct_field = field.into();
        self
    }

    /// Column holding the target primary key.
    pub fn fk_field(mut self, field: impl Into<String>) -> Self {
        self.fk_field = field.into();
        self
    }
}

/// The reverse side of a polymorphic reference, declared on the referenced model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericRelation {
    pub(crate) name: String,
    pub(crate) target: String,
    pub(crate) ct_field: String,
    pub(crate) fk_field: String,
}

impl GenericRelation {
    /// Declare a collection `name` of `target` records pointing here polymorphically.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            ct_field: "content_type".to_string(),
            fk_field: "object_id".to_string(),
        }
    }

    /// Type column on the target.
    pub fn ct_field(mut self, field: impl Into<String>) -> Self {
        self.ct_field = field.into();
        self
    }

    /// Id column on the target.
    pub fn fk_field(mut self, field: impl Into<String>) -> Self {
        self.fk_field = field.into();
        self
    }
}

/// Locally declared relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelationDef {
    ForeignKey(ForeignKey),
    OneToOne(OneToOne),
    ManyToMany(ManyToMany),
    GenericForeignKey(GenericForeignKey),
    GenericRelation(GenericRelation),
}

impl RelationDef {
    pub(crate) fn name(&self) -> &str {
        match self {
            RelationDef::ForeignKey(r) => &r.name,
            RelationDef::OneToOne(r) => &r.name,
            RelationDef::ManyToMany(r) => &r.name,
            RelationDef::GenericForeignKey(r) => &r.name,
            RelationDef::GenericRelation(r) => &r.name,
        }
    }
}

/// Flavour of a manager attached to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    /// Ordinary manager: its querysets cannot be sealed.
    Plain,
    /// Seal-capable manager. `seal` forces every query to be sealed; `None`
    /// inherits the model's default.
    Sealable { seal: Option<bool> },
    /// Seal-capable manager built from a queryset (`as_manager()` flavour).
    FromQuerySet { seal: Option<bool> },
}

/// A named entry point producing base querysets for a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manager {
    pub(crate) name: String,
    pub(crate) kind: ManagerKind,
}

impl Manager {
    /// A plain manager.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ManagerKind::Plain,
        }
    }

    /// A seal-capable manager inheriting the model's seal default.
    pub fn sealable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ManagerKind::Sealable { seal: None },
        }
    }

    /// A seal-capable manager that always (or never) seals its querysets.
    pub fn sealable_with(name: impl Into<String>, seal: bool) -> Self {
        Self {
            name: name.into(),
            kind: ManagerKind::Sealable { seal: Some(seal) },
        }
    }

    /// A seal-capable manager created from the sealable queryset.
    pub fn from_queryset(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ManagerKind::FromQuerySet { seal: None },
        }
    }

    /// Manager name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Manager flavour.
    pub fn kind(&self) -> ManagerKind {
        self.kind
    }

    /// Whether querysets from this manager support `seal()`.
    pub fn is_sealable(&self) -> bool {
        !matches!(self.kind, ManagerKind::Plain)
    }

    /// Name used for this manager's origin in startup checks.
    pub(crate) fn origin(&self) -> &'static str {
        match self.kind {
            ManagerKind::FromQuerySet { .. } => "SealableQuerySet.as_manager()",
            _ => "SealableManager",
        }
    }
}

/// Declaration of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDef {
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) relations: Vec<RelationDef>,
    pub(crate) parent: Option<String>,
    pub(crate) extends: Vec<String>,
    pub(crate) proxy_of: Option<String>,
    pub(crate) is_abstract: bool,
    pub(crate) sealable: Option<bool>,
    pub(crate) seal_queries: Option<bool>,
    pub(crate) managers: Vec<Manager>,
}

impl ModelDef {
    /// Start a declaration for the model `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
            parent: None,
            extends: Vec::new(),
            proxy_of: None,
            is_abstract: false,
            sealable: None,
            seal_queries: None,
            managers: Vec::new(),
        }
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ==================== Sealing opt-in ====================

    /// Opt this model (and its subclasses) into sealing.
    pub fn sealable(mut self) -> Self {
        self.sealable = Some(true);
        self
    }

    /// Opt into sealing and make the default manager always (or never) seal.
    pub fn sealable_with(mut self, seal: bool) -> Self {
        self.sealable = Some(true);
        self.seal_queries = Some(seal);
        self
    }

    // ==================== Columns ====================

    /// Declare a plain column.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            primary_key: false,
        });
        self
    }

    /// Declare several plain columns.
    pub fn fields(mut self, names: &[&str]) -> Self {
        for name in names {
            self.fields.push(FieldDef {
                name: name.to_string(),
                primary_key: false,
            });
        }
        self
    }

    /// Declare the primary key column (default `id`).
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            primary_key: true,
        });
        self
    }

    // ==================== Relations ====================

    /// Declare a forward many-to-one reference.
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.relations.push(RelationDef::ForeignKey(fk));
        self
    }

    /// Declare a forward one-to-one reference.
    pub fn one_to_one(mut self, o2o: OneToOne) -> Self {
        self.relations.push(RelationDef::OneToOne(o2o));
        self
    }

    /// Declare a many-to-many collection.
    pub fn many_to_many(mut self, m2m: ManyToMany) -> Self {
        self.relations.push(RelationDef::ManyToMany(m2m));
        self
    }

    /// Declare a polymorphic reference.
    pub fn generic_foreign_key(mut self, gfk: GenericForeignKey) -> Self {
        self.relations.push(RelationDef::GenericForeignKey(gfk));
        self
    }

    /// Declare the reverse side of a polymorphic reference.
    pub fn generic_relation(mut self, rel: GenericRelation) -> Self {
        self.relations.push(RelationDef::GenericRelation(rel));
        self
    }

    // ==================== Inheritance ====================

    /// Multi-table inheritance: this model extends the concrete model `parent`.
    ///
    /// Creates the `<parent>_ptr` parent link; the child primary key becomes
    /// `<parent>_ptr_id`.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Copy the columns, relations, managers and seal opt-in of an abstract model.
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.extends.push(base.into());
        self
    }

    /// Mark the model abstract: it has no storage and is never registered.
    pub fn abstract_model(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Mark the model as a proxy of `concrete`: same storage, same accessors.
    pub fn proxy_of(mut self, concrete: impl Into<String>) -> Self {
        self.proxy_of = Some(concrete.into());
        self
    }

    // ==================== Managers ====================

    /// Attach a manager. The first manager becomes the default one; models
    /// without managers get `objects`.
    pub fn manager(mut self, manager: Manager) -> Self {
        self.managers.push(manager);
        self
    }
}

/// Lower-cased model name, used to derive default accessor and column names.
pub(crate) fn model_name(name: &str) -> String {
    name.to_lowercase()
}

/// Whether a `related_name` hides the reverse accessor.
pub(crate) fn is_hidden(related_name: Option<&str>) -> bool {
    related_name.is_some_and(|name| name.ends_with(HIDDEN_RELATED_NAME))
}
