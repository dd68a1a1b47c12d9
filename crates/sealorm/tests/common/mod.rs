//! Shared fixtures: a small zoo of sealable and plain models on a
//! [`MemoryBackend`], with fetch and violation monitors attached.

#![allow(dead_code)]

use sealorm::{
    ForeignKey, GenericForeignKey, GenericRelation, ManyToMany, MemoryBackend, ModelDef, OneToOne,
    Record, Registry, SealConfig, SealError, Session, StatsMonitor, Value, ViolationLog, row,
};
use std::sync::Arc;

pub struct Fixture {
    pub session: Session<MemoryBackend>,
    pub stats: Arc<StatsMonitor>,
    pub log: Arc<ViolationLog>,
}

impl Fixture {
    pub fn backend(&self) -> &MemoryBackend {
        self.session.backend()
    }

    /// Run `f` and return its output with the number of fetches it issued.
    pub fn fetches<T>(&self, f: impl FnOnce() -> T) -> (T, u64) {
        let before = self.stats.fetch_count();
        let out = f();
        (out, self.stats.fetch_count() - before)
    }
}

pub fn registry() -> Arc<Registry> {
    Registry::builder()
        .model(
            ModelDef::new("Nickname")
                .sealable()
                .field("name")
                .generic_foreign_key(GenericForeignKey::new("content_object")),
        )
        .model(ModelDef::new("Climate").sealable().field("temperature"))
        .model(
            ModelDef::new("Location")
                .sealable()
                .fields(&["latitude", "longitude"])
                .many_to_many(ManyToMany::new("climates", "Climate").related_name("locations"))
                .many_to_many(ManyToMany::new("related_locations", "self")),
        )
        .model(ModelDef::new("Island").foreign_key(ForeignKey::new("location", "Location")))
        .model(ModelDef::new("Leak").field("description"))
        .model(
            ModelDef::new("SeaLion")
                .sealable()
                .fields(&["height", "weight"])
                .foreign_key(ForeignKey::new("location", "Location").null().related_name("visitors"))
                .many_to_many(
                    ManyToMany::new("previous_locations", "Location").related_name("previous_visitors"),
                )
                .foreign_key(ForeignKey::new("leak", "Leak").null().related_name("sealion_just_friends"))
                .one_to_one(OneToOne::new("leak_o2o", "Leak").null().related_name("sealion_soulmate")),
        )
        .model(ModelDef::new("SealionProxy").proxy_of("SeaLion"))
        .model(ModelDef::new("GreatSeaLion").parent("SeaLion"))
        .model(
            ModelDef::new("SeaGull")
                .sealable()
                .one_to_one(OneToOne::new("sealion", "SeaLion").null().related_name("gull"))
                .generic_relation(GenericRelation::new("nicknames", "Nickname")),
        )
        .build()
        .expect("fixture registry")
}

/// One location with one climate, one leak, one great sea lion (sea lion
/// `1`) that visited the location, its gull and the gull's nickname.
pub fn seed(backend: &MemoryBackend) -> Result<(), SealError> {
    let location = backend.insert(
        "Location",
        row! { "latitude" => 51.585474, "longitude" => 156.634331 },
    )?;
    let climate = backend.insert("Climate", row! { "temperature" => 100 })?;
    backend.link("Location", "climates", location.clone(), climate)?;
    let leak = backend.insert("Leak", row! { "description" => "Salt water" })?;
    let sealion = backend.insert(
        "GreatSeaLion",
        row! {
            "height" => 1,
            "weight" => 100,
            "location_id" => location.clone(),
            "leak_id" => leak.clone(),
            "leak_o2o_id" => leak,
        },
    )?;
    backend.link("SeaLion", "previous_locations", sealion.clone(), location)?;
    let gull = backend.insert("SeaGull", row! { "sealion_id" => sealion })?;
    backend.insert(
        "Nickname",
        row! {
            "name" => "Jonathan Livingston",
            "content_type" => "SeaGull",
            "object_id" => gull,
        },
    )?;
    Ok(())
}

pub fn fixture_with(config: SealConfig) -> Fixture {
    let registry = registry();
    let backend = MemoryBackend::new(registry.clone());
    seed(&backend).expect("seed");
    let stats = Arc::new(StatsMonitor::new());
    let log = Arc::new(ViolationLog::new());
    let session = Session::new(registry, backend)
        .with_config(config)
        .with_monitor_arc(stats.clone())
        .with_violation_monitor_arc(log.clone());
    Fixture {
        session,
        stats,
        log,
    }
}

/// Violations fail hard.
pub fn strict() -> Fixture {
    fixture_with(SealConfig::new().strict())
}

/// Violations are reported, then the lazy fetch runs.
pub fn advisory() -> Fixture {
    fixture_with(SealConfig::new())
}

pub fn pks(records: &[Record]) -> Vec<Value> {
    records.iter().filter_map(Record::pk).collect()
}

pub fn pk(record: &Record) -> Value {
    record.pk().unwrap_or(Value::Null)
}

#[track_caller]
pub fn assert_violation<T: std::fmt::Debug>(result: Result<T, SealError>, message: &str) {
    match result {
        Err(SealError::Unsealed(violation)) => assert_eq!(violation.to_string(), message),
        other => panic!("expected violation {message:?}, got {other:?}"),
    }
}
