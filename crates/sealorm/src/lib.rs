//! # sealorm
//!
//! Sealed record graphs for ORMs: declare up front what a query loads, and
//! every hidden lazy fetch from the results becomes a reported violation.
//!
//! ## Features
//!
//! - **Opt-in sealing**: models opt in with [`ModelDef::sealable`]; only their
//!   accessors are guarded
//! - **Sealed querysets**: [`QuerySet::seal`] stamps every produced record,
//!   eager joins included, and rewrites prefetch lookups so prefetched records
//!   are sealed as well
//! - **Advisory or strict**: violations are logged and sent to monitors, or
//!   turned into [`SealError::Unsealed`] per [`SealConfig`]
//! - **Backend agnostic**: the crate lowers queries into [`FetchRequest`]s; a
//!   [`Backend`] answers them. [`MemoryBackend`] is the in-process reference
//! - **Fetch monitoring**: count fetches per model with [`StatsMonitor`],
//!   collect violations with [`ViolationLog`]
//! - **Startup checks**: [`Registry::check`] flags seal-capable managers on
//!   models that did not opt in
//!
//! ## Example
//!
//! ```ignore
//! use sealorm::{ForeignKey, MemoryBackend, ModelDef, Registry, Session, row};
//!
//! let registry = Registry::builder()
//!     .model(ModelDef::new("Location").sealable().field("latitude"))
//!     .model(
//!         ModelDef::new("SeaLion")
//!             .sealable()
//!             .field("height")
//!             .foreign_key(ForeignKey::new("location", "Location").null()),
//!     )
//!     .build()?;
//!
//! let backend = MemoryBackend::new(registry.clone());
//! let location = backend.insert("Location", row! { "latitude" => 51.2 })?;
//! backend.insert("SeaLion", row! { "height" => 1, "location_id" => location })?;
//!
//! let session = Session::new(registry, backend).strict();
//! let sea_lion = session.objects("SeaLion")?.seal()?.get(&session)?;
//! assert!(sea_lion.related(&session, "location").unwrap_err().is_unsealed());
//!
//! let sea_lion = session
//!     .objects("SeaLion")?
//!     .select_related(["location"])
//!     .seal()?
//!     .get(&session)?;
//! assert!(sea_lion.related(&session, "location")?.is_some());
//! ```

pub mod accessor;
pub mod backend;
pub mod check;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod iter;
pub mod memory;
pub mod model;
pub mod monitor;
pub mod prefetch;
pub mod query;
pub mod record;
pub mod registry;
pub mod related_set;
pub mod session;
pub mod snapshot;

mod guard;

pub use accessor::Accessor;
pub use backend::{Backend, Condition, FetchRequest, FetchedRow, JoinRequest, OWNER_ANNOTATION};
pub use check::{SealIssue, SealIssueLevel};
pub use config::{SealConfig, SealMode};
pub use descriptor::{Descriptor, FieldDescriptor, RelationDescriptor, RelationKind};
pub use error::{SealError, SealResult, UnsealedAttributeAccess, ViolationKind};
pub use iter::SealingIter;
pub use memory::MemoryBackend;
pub use model::{
    ForeignKey, GenericForeignKey, GenericRelation, Manager, ManagerKind, ManyToMany, ModelDef,
    OneToOne,
};
pub use monitor::{
    CompositeMonitor, FetchContext, FetchMonitor, FetchOutcome, FetchStats, NoopMonitor,
    StatsMonitor, ViolationLog, ViolationMonitor,
};
pub use prefetch::prefetch_related_objects;
pub use query::{LOOKUP_SEP, Prefetch, QuerySet, SealIntent};
pub use record::{Cached, Record, Row, SealState, Value};
pub use registry::{ModelMeta, ModelRegistration, Registry, RegistryBuilder};
pub use related_set::RelatedSet;
pub use session::Session;
pub use snapshot::{CachedSnapshot, CollectionSnapshot, RecordSnapshot};

// Re-exported for `inventory::submit!` in downstream crates.
pub use inventory;

/// Build a [`Row`] from `column => value` pairs.
///
/// ```ignore
/// let row = sealorm::row! { "height" => 1, "location_id" => 2 };
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::Row::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $( row.insert(::std::string::String::from($column), $crate::Value::from($value)); )+
        row
    }};
}
