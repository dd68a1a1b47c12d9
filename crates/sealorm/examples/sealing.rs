//! Sealing walkthrough on the in-memory backend
//!
//! Run with: cargo run --example sealing -p sealorm

use sealorm::{
    ForeignKey, ManyToMany, MemoryBackend, ModelDef, Registry, SealConfig, SealError, Session,
    StatsMonitor, ViolationLog, row,
};
use std::sync::Arc;

fn main() -> Result<(), SealError> {
    // Declare models; only opted-in models get guarded accessors
    let registry = Registry::builder()
        .model(ModelDef::new("Climate").sealable().field("temperature"))
        .model(
            ModelDef::new("Location")
                .sealable()
                .fields(&["latitude", "longitude"])
                .many_to_many(ManyToMany::new("climates", "Climate").related_name("locations")),
        )
        .model(
            ModelDef::new("SeaLion")
                .sealable()
                .fields(&["height", "weight"])
                .foreign_key(ForeignKey::new("location", "Location").null().related_name("visitors")),
        )
        .build()?;

    for issue in registry.check() {
        println!("check: {issue}");
    }

    // Seed the store
    let backend = MemoryBackend::new(registry.clone());
    let location = backend.insert(
        "Location",
        row! { "latitude" => 51.585474, "longitude" => 156.634331 },
    )?;
    let climate = backend.insert("Climate", row! { "temperature" => 100 })?;
    backend.link("Location", "climates", location.clone(), climate)?;
    backend.insert(
        "SeaLion",
        row! { "height" => 1, "weight" => 100, "location_id" => location },
    )?;

    let stats = Arc::new(StatsMonitor::new());
    let log = Arc::new(ViolationLog::new());

    // Advisory session: violations are logged, then the lazy fetch runs
    let session = Session::new(registry.clone(), &backend)
        .with_monitor_arc(stats.clone())
        .with_violation_monitor_arc(log.clone());

    let sea_lion = session.objects("SeaLion")?.seal()?.get(&session)?;
    let location = sea_lion.related(&session, "location")?;
    println!("lazily fetched: {location:?}");
    for message in log.messages() {
        println!("violation: {message}");
    }

    // Declare what the query loads and nothing is reported
    log.clear();
    stats.reset();
    let sea_lion = session
        .objects("SeaLion")?
        .select_related(["location"])
        .prefetch_related(["location__climates"])
        .seal()?
        .get(&session)?;
    if let Some(location) = sea_lion.related(&session, "location")? {
        let climates = location
            .related_set(&session, "climates")?
            .fetch_all(&session)?;
        println!("climates: {}", climates.len());
    }
    println!(
        "fetches: {}, violations: {}",
        stats.fetch_count(),
        log.len()
    );

    // Strict session: violations are errors
    let session = Session::new(registry, &backend).with_config(SealConfig::new().strict());
    let sea_lion = session
        .objects("SeaLion")?
        .defer(["weight"])
        .seal()?
        .get(&session)?;
    match sea_lion.value(&session, "weight") {
        Err(err) if err.is_unsealed() => println!("strict: {err}"),
        other => println!("unexpected: {other:?}"),
    }

    // Snapshots keep the seal state
    let json = sea_lion.to_json()?;
    println!("snapshot: {json}");

    Ok(())
}
