//! Model registry: resolves declarations into frozen accessor tables.
//!
//! Building a [`Registry`] happens in phases:
//!
//! 1. abstract bases are folded into the models extending them;
//! 2. models are declared in order. Relations pointing at a model that is not
//!    declared yet are parked in a pending-operation arena keyed by the target
//!    name and flushed when the target gets declared;
//! 3. seal opt-in and managers are resolved along proxy and parent chains;
//! 4. every opted-in concrete model (plus the ones named with
//!    [`RegistryBuilder::make_sealable`]) gets its accessors guarded.
//!
//! After `build()` the registry is immutable and shared as `Arc<Registry>`.

use crate::accessor::Accessor;
use crate::descriptor::{
    Descriptor, FieldDescriptor, GenericColumns, LinkTable, RelationDescriptor, RelationKind,
};
use crate::error::{SealError, SealResult};
use crate::model::{DEFAULT_PK, Manager, ManagerKind, ModelDef, RelationDef, is_hidden, model_name};
use crate::query::QuerySet;
use crate::record::{Record, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Registration entry for models declared next to their types.
///
/// ```ignore
/// fn sea_lion() -> sealorm::ModelDef {
///     sealorm::ModelDef::new("SeaLion").sealable().field("weight")
/// }
///
/// sealorm::inventory::submit! {
///     sealorm::ModelRegistration { declare: sea_lion }
/// }
/// ```
pub struct ModelRegistration {
    /// Function returning the model declaration.
    pub declare: fn() -> ModelDef,
}

inventory::collect!(ModelRegistration);

/// Resolved metadata of a declared model.
#[derive(Debug, Clone)]
pub struct ModelMeta {
    name: String,
    concrete: String,
    pk: String,
    columns: Vec<String>,
    parent: Option<String>,
    parent_link: Option<String>,
    proxy_of: Option<String>,
    sealable: bool,
    seal_queries: bool,
    registered: bool,
    accessors: BTreeMap<String, Accessor>,
    managers: Vec<Manager>,
    local: Vec<String>,
    related_objects: Vec<String>,
    declared_sealable: Option<bool>,
    declared_seal_queries: Option<bool>,
}

impl ModelMeta {
    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage-backed model (differs from `name` for proxies).
    pub fn concrete_model(&self) -> &str {
        &self.concrete
    }

    /// Primary key column.
    pub fn pk(&self) -> &str {
        &self.pk
    }

    /// Columns stored at this model's own inheritance level.
    pub fn local_columns(&self) -> &[String] {
        &self.columns
    }

    /// Concrete parent in multi-table inheritance.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Accessor name of the parent link (`<parent>_ptr`).
    pub fn parent_link(&self) -> Option<&str> {
        self.parent_link.as_deref()
    }

    /// Whether the model is a proxy.
    pub fn is_proxy(&self) -> bool {
        self.proxy_of.is_some()
    }

    /// Whether the model opted into sealing (directly or by inheritance).
    pub fn is_sealable(&self) -> bool {
        self.sealable
    }

    /// Whether the default manager seals every query.
    pub fn seals_queries(&self) -> bool {
        self.seal_queries
    }

    /// Whether registration ran on this model.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Accessors installed on this model (inherited ones excluded).
    pub fn accessors(&self) -> impl Iterator<Item = (&str, &Accessor)> {
        self.accessors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Managers, default first.
    pub fn managers(&self) -> &[Manager] {
        &self.managers
    }

    /// The default manager.
    pub fn default_manager(&self) -> &Manager {
        // Resolution always installs at least one manager.
        &self.managers[0]
    }

    /// Reverse accessors contributed to this model by other models' relations.
    pub fn related_objects(&self) -> &[String] {
        &self.related_objects
    }

    fn insert_accessor(&mut self, descriptor: Descriptor) -> SealResult<()> {
        let name = descriptor.name().to_string();
        if self.accessors.contains_key(&name) {
            return Err(SealError::configuration(format!(
                "Accessor '{}.{}' clashes with an existing field or relation",
                self.name, name
            )));
        }
        self.accessors.insert(name, Accessor::plain(descriptor));
        Ok(())
    }
}

/// Deferred work waiting for its target model to be declared.
#[derive(Debug)]
enum PendingOp {
    /// Install a reverse accessor on the target.
    Contribute {
        origin: String,
        descriptor: RelationDescriptor,
    },
    /// Only the target's existence is required.
    Resolve { origin: String },
}

impl PendingOp {
    fn origin(&self) -> &str {
        match self {
            PendingOp::Contribute { origin, .. } | PendingOp::Resolve { origin } => origin,
        }
    }
}

/// Builder collecting model declarations.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    defs: Vec<ModelDef>,
    explicit: Vec<String>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a model.
    pub fn model(mut self, def: ModelDef) -> Self {
        self.defs.push(def);
        self
    }

    /// Declare several models.
    pub fn models(mut self, defs: impl IntoIterator<Item = ModelDef>) -> Self {
        self.defs.extend(defs);
        self
    }

    /// Declare every model submitted through [`ModelRegistration`].
    pub fn with_registered_models(mut self) -> Self {
        for reg in inventory::iter::<ModelRegistration> {
            self.defs.push((reg.declare)());
        }
        self
    }

    /// Guard the accessors of a model that did not opt into sealing
    /// (third-party registration).
    pub fn make_sealable(mut self, model: impl Into<String>) -> Self {
        self.explicit.push(model.into());
        self
    }

    /// Resolve every declaration and guard opted-in models.
    pub fn build(self) -> SealResult<Arc<Registry>> {
        let defs = flatten_abstract(self.defs)?;

        let mut registry = Registry {
            models: BTreeMap::new(),
            order: Vec::new(),
        };
        let mut pending: BTreeMap<String, Vec<PendingOp>> = BTreeMap::new();

        for def in &defs {
            let (meta, ops) = declare(def)?;
            let name = meta.name.clone();
            registry.models.insert(name.clone(), meta);
            registry.order.push(name.clone());

            for (target, op) in ops {
                if registry.models.contains_key(&target) {
                    registry.apply(&target, op)?;
                } else {
                    pending.entry(target).or_default().push(op);
                }
            }
            for op in pending.remove(&name).unwrap_or_default() {
                registry.apply(&name, op)?;
            }
        }

        if let Some((target, ops)) = pending.into_iter().next() {
            let origin = ops.first().map(PendingOp::origin).unwrap_or_default();
            return Err(SealError::configuration(format!(
                "Related model '{target}' referenced by '{origin}' is not declared"
            )));
        }

        registry.resolve_inheritance()?;
        registry.validate_generic_relations()?;
        registry.register_sealable(&self.explicit)?;

        Ok(Arc::new(registry))
    }
}

/// Fold abstract bases into the models extending them and drop abstract models.
fn flatten_abstract(defs: Vec<ModelDef>) -> SealResult<Vec<ModelDef>> {
    let mut by_name: BTreeMap<String, ModelDef> = BTreeMap::new();
    for def in &defs {
        if by_name.insert(def.name.clone(), def.clone()).is_some() {
            return Err(SealError::configuration(format!(
                "Model '{}' is declared more than once",
                def.name
            )));
        }
    }

    fn flatten(
        def: &ModelDef,
        by_name: &BTreeMap<String, ModelDef>,
        stack: &mut Vec<String>,
    ) -> SealResult<ModelDef> {
        if stack.contains(&def.name) {
            return Err(SealError::configuration(format!(
                "Abstract inheritance cycle through '{}'",
                def.name
            )));
        }
        stack.push(def.name.clone());

        let mut flat = ModelDef::new(def.name.clone());
        flat.parent = def.parent.clone();
        flat.proxy_of = def.proxy_of.clone();
        flat.is_abstract = def.is_abstract;
        for base_name in &def.extends {
            let base = by_name.get(base_name).ok_or_else(|| {
                SealError::configuration(format!(
                    "'{}' extends unknown model '{base_name}'",
                    def.name
                ))
            })?;
            if !base.is_abstract {
                return Err(SealError::configuration(format!(
                    "'{}' can only extend abstract models, '{base_name}' is concrete",
                    def.name
                )));
            }
            let base = flatten(base, by_name, stack)?;
            flat.fields.extend(base.fields);
            flat.relations.extend(base.relations);
            flat.sealable = flat.sealable.or(base.sealable);
            flat.seal_queries = flat.seal_queries.or(base.seal_queries);
            if flat.managers.is_empty() {
                flat.managers = base.managers;
            }
        }
        flat.fields.extend(def.fields.iter().cloned());
        flat.relations.extend(def.relations.iter().cloned());
        if def.sealable.is_some() {
            flat.sealable = def.sealable;
        }
        if def.seal_queries.is_some() {
            flat.seal_queries = def.seal_queries;
        }
        if !def.managers.is_empty() {
            flat.managers = def.managers.clone();
        }

        stack.pop();
        Ok(flat)
    }

    let mut out = Vec::new();
    for def in &defs {
        if def.is_abstract {
            continue;
        }
        out.push(flatten(def, &by_name, &mut Vec::new())?);
    }
    for def in &out {
        for target in def.relations.iter().filter_map(relation_target) {
            if by_name.get(target).is_some_and(|d| d.is_abstract) {
                return Err(SealError::configuration(format!(
                    "'{}' relates to abstract model '{target}'",
                    def.name
                )));
            }
        }
    }
    Ok(out)
}

fn relation_target(rel: &RelationDef) -> Option<&str> {
    match rel {
        RelationDef::ForeignKey(r) => Some(&r.target),
        RelationDef::OneToOne(r) => Some(&r.target),
        RelationDef::ManyToMany(r) => Some(&r.target),
        RelationDef::GenericRelation(r) => Some(&r.target),
        RelationDef::GenericForeignKey(_) => None,
    }
}

fn resolve_self(target: &str, model: &str) -> String {
    if target == "self" {
        model.to_string()
    } else {
        target.to_string()
    }
}

fn field_descriptor(model: &str, column: &str, pk: &str) -> Descriptor {
    Descriptor::Field(FieldDescriptor {
        name: column.to_string(),
        column: column.to_string(),
        model: model.to_string(),
        primary_key: column == pk,
    })
}

/// Build the metadata of one model and the operations it needs on other models.
fn declare(def: &ModelDef) -> SealResult<(ModelMeta, Vec<(String, PendingOp)>)> {
    let name = def.name.clone();
    let lower = model_name(&name);
    let mut ops = Vec::new();

    let pk = match (&def.parent, &def.proxy_of) {
        (Some(parent), _) => format!("{}_ptr_id", model_name(parent)),
        (None, Some(_)) => String::new(),
        (None, None) => def
            .fields
            .iter()
            .find(|f| f.primary_key)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| DEFAULT_PK.to_string()),
    };

    let mut meta = ModelMeta {
        name: name.clone(),
        concrete: name.clone(),
        pk: pk.clone(),
        columns: Vec::new(),
        parent: def.parent.clone(),
        parent_link: None,
        proxy_of: def.proxy_of.clone(),
        sealable: false,
        seal_queries: false,
        registered: false,
        accessors: BTreeMap::new(),
        managers: def.managers.clone(),
        local: Vec::new(),
        related_objects: Vec::new(),
        declared_sealable: def.sealable,
        declared_seal_queries: def.seal_queries,
    };

    if let Some(concrete) = &def.proxy_of {
        if !def.fields.is_empty() || !def.relations.is_empty() || def.parent.is_some() {
            return Err(SealError::configuration(format!(
                "Proxy model '{name}' cannot declare fields, relations or a parent"
            )));
        }
        ops.push((
            concrete.clone(),
            PendingOp::Resolve {
                origin: format!("{name} (proxy)"),
            },
        ));
        return Ok((meta, ops));
    }

    let mut columns: Vec<String> = Vec::new();
    let mut add_column = |meta: &mut ModelMeta, column: &str| -> SealResult<()> {
        if columns.iter().any(|c| c == column) {
            return Ok(());
        }
        columns.push(column.to_string());
        meta.insert_accessor(field_descriptor(&name, column, &pk))?;
        meta.local.push(column.to_string());
        Ok(())
    };

    add_column(&mut meta, &pk)?;

    if let Some(parent) = &def.parent {
        let link = format!("{}_ptr", model_name(parent));
        meta.insert_accessor(Descriptor::Relation(RelationDescriptor {
            name: link.clone(),
            kind: RelationKind::ForwardOneToOne,
            model: name.clone(),
            target: Some(parent.clone()),
            column: pk.clone(),
            nullable: false,
            parent_link: true,
            field_name: link.clone(),
            prefetch_key: link.clone(),
            reverse_accessor: Some(lower.clone()),
            link: None,
            generic: None,
            symmetrical: false,
        }))?;
        meta.local.push(link.clone());
        meta.parent_link = Some(link.clone());
        ops.push((
            parent.clone(),
            PendingOp::Contribute {
                origin: format!("{name}.{link}"),
                descriptor: RelationDescriptor {
                    name: lower.clone(),
                    kind: RelationKind::ReverseOneToOne,
                    model: parent.clone(),
                    target: Some(name.clone()),
                    column: pk.clone(),
                    nullable: false,
                    parent_link: true,
                    field_name: link.clone(),
                    prefetch_key: lower.clone(),
                    reverse_accessor: Some(link),
                    link: None,
                    generic: None,
                    symmetrical: false,
                },
            },
        ));
    }

    for field in &def.fields {
        if field.primary_key && def.parent.is_some() {
            return Err(SealError::configuration(format!(
                "'{name}' inherits its primary key from '{}'",
                def.parent.as_deref().unwrap_or_default()
            )));
        }
        add_column(&mut meta, &field.name)?;
    }

    for rel in &def.relations {
        let rel_name = rel.name().to_string();
        let origin = format!("{name}.{rel_name}");
        match rel {
            RelationDef::ForeignKey(fk) => {
                let target = resolve_self(&fk.target, &name);
                let column = format!("{rel_name}_id");
                let reverse = (!is_hidden(fk.related_name.as_deref()))
                    .then(|| fk.related_name.clone().unwrap_or_else(|| format!("{lower}_set")));
                add_column(&mut meta, &column)?;
                meta.insert_accessor(Descriptor::Relation(RelationDescriptor {
                    name: rel_name.clone(),
                    kind: RelationKind::ForwardManyToOne,
                    model: name.clone(),
                    target: Some(target.clone()),
                    column: column.clone(),
                    nullable: fk.null,
                    parent_link: false,
                    field_name: rel_name.clone(),
                    prefetch_key: rel_name.clone(),
                    reverse_accessor: reverse.clone(),
                    link: None,
                    generic: None,
                    symmetrical: false,
                }))?;
                meta.local.push(rel_name.clone());
                let op = match reverse {
                    Some(accessor) => PendingOp::Contribute {
                        origin,
                        descriptor: RelationDescriptor {
                            name: accessor.clone(),
                            kind: RelationKind::ReverseManyToOne,
                            model: target.clone(),
                            target: Some(name.clone()),
                            column,
                            nullable: fk.null,
                            parent_link: false,
                            field_name: rel_name.clone(),
                            prefetch_key: accessor,
                            reverse_accessor: Some(rel_name),
                            link: None,
                            generic: None,
                            symmetrical: false,
                        },
                    },
                    None => PendingOp::Resolve { origin },
                };
                ops.push((target, op));
            }
            RelationDef::OneToOne(o2o) => {
                let target = resolve_self(&o2o.target, &name);
                let column = format!("{rel_name}_id");
                let reverse = (!is_hidden(o2o.related_name.as_deref()))
                    .then(|| o2o.related_name.clone().unwrap_or_else(|| lower.clone()));
                add_column(&mut meta, &column)?;
                meta.insert_accessor(Descriptor::Relation(RelationDescriptor {
                    name: rel_name.clone(),
                    kind: RelationKind::ForwardOneToOne,
                    model: name.clone(),
                    target: Some(target.clone()),
                    column: column.clone(),
                    nullable: o2o.null,
                    parent_link: false,
                    field_name: rel_name.clone(),
                    prefetch_key: rel_name.clone(),
                    reverse_accessor: reverse.clone(),
                    link: None,
                    generic: None,
                    symmetrical: false,
                }))?;
                meta.local.push(rel_name.clone());
                let op = match reverse {
                    Some(accessor) => PendingOp::Contribute {
                        origin,
                        descriptor: RelationDescriptor {
                            name: accessor.clone(),
                            kind: RelationKind::ReverseOneToOne,
                            model: target.clone(),
                            target: Some(name.clone()),
                            column,
                            nullable: o2o.null,
                            parent_link: false,
                            field_name: rel_name.clone(),
                            prefetch_key: accessor,
                            reverse_accessor: Some(rel_name),
                            link: None,
                            generic: None,
                            symmetrical: false,
                        },
                    },
                    None => PendingOp::Resolve { origin },
                };
                ops.push((target, op));
            }
            RelationDef::ManyToMany(m2m) => {
                let target = resolve_self(&m2m.target, &name);
                let target_lower = model_name(&target);
                let self_referential = target == name;
                let symmetrical = self_referential && m2m.symmetrical.unwrap_or(true);
                let link = if self_referential {
                    LinkTable {
                        table: m2m
                            .through
                            .clone()
                            .unwrap_or_else(|| format!("{lower}_{rel_name}")),
                        source: format!("from_{lower}_id"),
                        target: format!("to_{lower}_id"),
                    }
                } else {
                    LinkTable {
                        table: m2m
                            .through
                            .clone()
                            .unwrap_or_else(|| format!("{lower}_{rel_name}")),
                        source: format!("{lower}_id"),
                        target: format!("{target_lower}_id"),
                    }
                };
                let reverse = (!symmetrical && !is_hidden(m2m.related_name.as_deref()))
                    .then(|| m2m.related_name.clone().unwrap_or_else(|| format!("{lower}_set")));
                meta.insert_accessor(Descriptor::Relation(RelationDescriptor {
                    name: rel_name.clone(),
                    kind: RelationKind::ManyToMany,
                    model: name.clone(),
                    target: Some(target.clone()),
                    column: link.source.clone(),
                    nullable: false,
                    parent_link: false,
                    field_name: rel_name.clone(),
                    prefetch_key: rel_name.clone(),
                    reverse_accessor: reverse.clone(),
                    link: Some(link.clone()),
                    generic: None,
                    symmetrical,
                }))?;
                meta.local.push(rel_name.clone());
                let op = match reverse {
                    Some(accessor) => {
                        let reversed = link.reversed();
                        PendingOp::Contribute {
                            origin,
                            descriptor: RelationDescriptor {
                                name: accessor,
                                kind: RelationKind::ManyToMany,
                                model: target.clone(),
                                target: Some(name.clone()),
                                column: reversed.source.clone(),
                                nullable: false,
                                parent_link: false,
                                field_name: rel_name.clone(),
                                prefetch_key: m2m
                                    .related_name
                                    .clone()
                                    .unwrap_or_else(|| lower.clone()),
                                reverse_accessor: Some(rel_name),
                                link: Some(reversed),
                                generic: None,
                                symmetrical: false,
                            },
                        }
                    }
                    None => PendingOp::Resolve { origin },
                };
                ops.push((target, op));
            }
            RelationDef::GenericForeignKey(gfk) => {
                add_column(&mut meta, &gfk.ct_field)?;
                add_column(&mut meta, &gfk.fk_field)?;
                meta.insert_accessor(Descriptor::Relation(RelationDescriptor {
                    name: rel_name.clone(),
                    kind: RelationKind::GenericForeignKey,
                    model: name.clone(),
                    target: None,
                    column: gfk.fk_field.clone(),
                    nullable: true,
                    parent_link: false,
                    field_name: rel_name.clone(),
                    prefetch_key: rel_name.clone(),
                    reverse_accessor: None,
                    link: None,
                    generic: Some(GenericColumns {
                        ct_field: gfk.ct_field.clone(),
                        fk_field: gfk.fk_field.clone(),
                    }),
                    symmetrical: false,
                }))?;
                meta.local.push(rel_name);
            }
            RelationDef::GenericRelation(rel) => {
                let target = resolve_self(&rel.target, &name);
                meta.insert_accessor(Descriptor::Relation(RelationDescriptor {
                    name: rel_name.clone(),
                    kind: RelationKind::GenericRelation,
                    model: name.clone(),
                    target: Some(target.clone()),
                    column: rel.fk_field.clone(),
                    nullable: false,
                    parent_link: false,
                    field_name: rel_name.clone(),
                    prefetch_key: rel_name.clone(),
                    reverse_accessor: None,
                    link: None,
                    generic: Some(GenericColumns {
                        ct_field: rel.ct_field.clone(),
                        fk_field: rel.fk_field.clone(),
                    }),
                    symmetrical: false,
                }))?;
                meta.local.push(rel_name);
                ops.push((target, PendingOp::Resolve { origin }));
            }
        }
    }

    meta.columns = columns;
    Ok((meta, ops))
}

/// Immutable model registry.
#[derive(Debug)]
pub struct Registry {
    models: BTreeMap<String, ModelMeta>,
    order: Vec<String>,
}

impl Registry {
    /// Start declaring models.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    // ==================== Build phases ====================

    fn apply(&mut self, target: &str, op: PendingOp) -> SealResult<()> {
        let PendingOp::Contribute { descriptor, .. } = op else {
            return Ok(());
        };
        let meta = self
            .models
            .get_mut(target)
            .ok_or_else(|| SealError::UnknownModel(target.to_string()))?;
        let accessor = descriptor.name.clone();
        meta.insert_accessor(Descriptor::Relation(descriptor))?;
        meta.related_objects.push(accessor);
        Ok(())
    }

    fn resolve_inheritance(&mut self) -> SealResult<()> {
        let names = self.order.clone();
        for name in &names {
            let meta = self.model(name)?;
            if let Some(parent) = meta.parent.as_deref()
                && self.model(parent)?.is_proxy()
            {
                return Err(SealError::configuration(format!(
                    "'{name}' cannot inherit from proxy model '{parent}'"
                )));
            }

            let concrete = self.concrete_of(name)?;
            let pk = self.model(&concrete)?.pk.clone();
            let sealable = self
                .inherited(name, |m| m.declared_sealable)?
                .unwrap_or(false);
            let seal_queries = self
                .inherited(name, |m| m.declared_seal_queries)?
                .unwrap_or(false);

            let meta = self
                .models
                .get_mut(name)
                .ok_or_else(|| SealError::UnknownModel(name.clone()))?;
            meta.concrete = concrete;
            meta.pk = pk;
            meta.sealable = sealable;
            meta.seal_queries = seal_queries;
            if meta.managers.is_empty() {
                meta.managers.push(if sealable {
                    Manager::sealable("objects")
                } else {
                    Manager::plain("objects")
                });
            }
        }
        Ok(())
    }

    /// Follow proxy links down to the storage-backed model.
    fn concrete_of(&self, name: &str) -> SealResult<String> {
        let mut seen = BTreeSet::new();
        let mut current = name.to_string();
        while let Some(next) = self.model(&current)?.proxy_of.clone() {
            if !seen.insert(current.clone()) {
                return Err(SealError::configuration(format!(
                    "Proxy cycle through '{name}'"
                )));
            }
            current = next;
        }
        Ok(current)
    }

    /// First declared value along the proxy and parent chains.
    fn inherited<T>(
        &self,
        name: &str,
        get: impl Fn(&ModelMeta) -> Option<T>,
    ) -> SealResult<Option<T>> {
        let mut seen = BTreeSet::new();
        let mut current = Some(name.to_string());
        while let Some(model) = current {
            if !seen.insert(model.clone()) {
                break;
            }
            let meta = self.model(&model)?;
            if let Some(value) = get(meta) {
                return Ok(Some(value));
            }
            current = meta.proxy_of.clone().or_else(|| meta.parent.clone());
        }
        Ok(None)
    }

    fn validate_generic_relations(&self) -> SealResult<()> {
        for meta in self.models.values() {
            for accessor in meta.accessors.values() {
                let Some(rel) = accessor.descriptor().as_relation() else {
                    continue;
                };
                if rel.kind != RelationKind::GenericRelation {
                    continue;
                }
                let (Some(target), Some(generic)) = (&rel.target, &rel.generic) else {
                    continue;
                };
                let columns = self.columns(target)?;
                for column in [&generic.ct_field, &generic.fk_field] {
                    if !columns.contains(column) {
                        return Err(SealError::configuration(format!(
                            "Generic relation '{}.{}' needs column '{column}' on '{target}'",
                            meta.name, rel.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn register_sealable(&mut self, explicit: &[String]) -> SealResult<()> {
        for name in explicit {
            self.model(name)?;
        }
        let names = self.order.clone();
        for name in &names {
            let meta = self.model(name)?;
            if meta.is_proxy() {
                continue;
            }
            if meta.sealable || explicit.contains(name) {
                self.make_model_sealable(name)?;
            }
        }
        Ok(())
    }

    /// Guard local accessors of `name`, plus the reverse accessors its
    /// relations installed on opted-in targets.
    fn make_model_sealable(&mut self, name: &str) -> SealResult<()> {
        let meta = self.model(name)?;
        let local = meta.local.clone();
        let sealable = meta.sealable;
        let remote: Vec<(String, String)> = meta
            .accessors
            .values()
            .filter_map(|a| a.descriptor().as_relation())
            .filter(|r| meta.local.contains(&r.name))
            .filter_map(|r| Some((r.target.clone()?, r.reverse_accessor.clone()?)))
            .collect();
        let related_objects = meta.related_objects.clone();

        let mut guarded = 0usize;
        for accessor in &local {
            guarded += usize::from(self.guard(name, accessor)?);
        }
        for (target, accessor) in &remote {
            if self.model(target)?.sealable {
                guarded += usize::from(self.guard(target, accessor)?);
            }
        }
        if !sealable {
            for accessor in &related_objects {
                guarded += usize::from(self.guard(name, accessor)?);
            }
        }

        if let Some(meta) = self.models.get_mut(name) {
            meta.registered = true;
        }
        tracing::debug!(
            target: "sealorm::registry",
            model = name,
            guarded,
            explicit = !sealable,
            "registered sealable model"
        );
        Ok(())
    }

    fn guard(&mut self, model: &str, accessor: &str) -> SealResult<bool> {
        let Some(entry) = self
            .models
            .get_mut(model)
            .and_then(|m| m.accessors.get_mut(accessor))
        else {
            // Hidden reverse accessors have no entry.
            return Ok(false);
        };
        let newly = entry.guard();
        if newly {
            tracing::trace!(target: "sealorm::registry", model, accessor, "guarded accessor");
        }
        Ok(newly)
    }

    // ==================== Lookups ====================

    /// Metadata of a declared model.
    pub fn model(&self, name: &str) -> SealResult<&ModelMeta> {
        self.models
            .get(name)
            .ok_or_else(|| SealError::UnknownModel(name.to_string()))
    }

    /// Declared models in declaration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelMeta> {
        self.order.iter().filter_map(|name| self.models.get(name))
    }

    /// Resolve an attribute on a model, walking proxy and parent chains.
    /// `pk` is an alias for the primary key column.
    pub fn accessor(&self, model: &str, name: &str) -> SealResult<&Accessor> {
        let meta = self.model(model)?;
        let name = if name == "pk" { meta.pk.as_str() } else { name };
        let mut seen = BTreeSet::new();
        let mut current = Some(meta);
        while let Some(meta) = current {
            if !seen.insert(meta.name.as_str()) {
                break;
            }
            if let Some(accessor) = meta.accessors.get(name) {
                return Ok(accessor);
            }
            current = match meta.proxy_of.as_deref().or(meta.parent.as_deref()) {
                Some(next) => Some(self.model(next)?),
                None => None,
            };
        }
        Err(SealError::unknown_attribute(model, name))
    }

    /// Resolve a relation accessor.
    pub fn relation(&self, model: &str, name: &str) -> SealResult<&RelationDescriptor> {
        self.accessor(model, name)?
            .descriptor()
            .as_relation()
            .ok_or_else(|| {
                SealError::usage(format!("'{name}' on {model} is a field, not a relation"))
            })
    }

    /// Concrete ancestors, nearest first.
    pub fn ancestors(&self, model: &str) -> SealResult<Vec<&ModelMeta>> {
        let mut out: Vec<&ModelMeta> = Vec::new();
        let mut current = self.model(&self.model(model)?.concrete)?.parent.clone();
        while let Some(name) = current {
            if out.iter().any(|m| m.name == name) {
                break;
            }
            let meta = self.model(&name)?;
            out.push(meta);
            current = meta.parent.clone();
        }
        Ok(out)
    }

    /// Every concrete column of the model, inherited columns first.
    pub fn columns(&self, model: &str) -> SealResult<Vec<String>> {
        let concrete = self.model(&self.model(model)?.concrete)?;
        let mut out = Vec::new();
        for ancestor in self.ancestors(model)?.into_iter().rev() {
            out.extend(ancestor.columns.iter().cloned());
        }
        out.extend(concrete.columns.iter().cloned());
        Ok(out)
    }

    /// Build a record from a (partial) row, without any fetch.
    pub fn instantiate(&self, model: &str, row: Row) -> SealResult<Record> {
        let meta = self.model(model)?;
        Ok(Record::new(&meta.name, &meta.concrete, &meta.pk, row))
    }

    // ==================== Query entry points ====================

    /// Base queryset of the model's default manager.
    pub fn objects(self: &Arc<Self>, model: &str) -> SealResult<QuerySet> {
        let meta = self.model(model)?;
        let manager = meta.default_manager().clone();
        self.manager_queryset(meta, &manager)
    }

    /// Base queryset of a named manager.
    pub fn manager(self: &Arc<Self>, model: &str, name: &str) -> SealResult<QuerySet> {
        let meta = self.model(model)?;
        let manager = meta
            .managers
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| SealError::unknown_attribute(model, name))?;
        self.manager_queryset(meta, &manager)
    }

    /// Plain, never sealed queryset used for fallback fetches.
    pub fn base(self: &Arc<Self>, model: &str) -> SealResult<QuerySet> {
        self.model(model)?;
        Ok(QuerySet::new(Arc::clone(self), model, false))
    }

    fn manager_queryset(self: &Arc<Self>, meta: &ModelMeta, manager: &Manager) -> SealResult<QuerySet> {
        let query = QuerySet::new(Arc::clone(self), &meta.name, manager.is_sealable());
        let seal = match manager.kind {
            ManagerKind::Plain => false,
            ManagerKind::Sealable { seal } | ManagerKind::FromQuerySet { seal } => {
                seal.unwrap_or(meta.seal_queries)
            }
        };
        if seal { query.seal() } else { Ok(query) }
    }
}

#[cfg(test)]
mod tests;
