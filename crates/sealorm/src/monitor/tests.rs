use super::*;
use crate::error::UnsealedAttributeAccess;
use crate::record::{Record, Row};
use std::sync::Arc;
use std::time::Duration;

fn sea_lion() -> Record {
    Record::new("SeaLion", "SeaLion", "id", Row::new())
}

#[test]
fn test_stats_monitor() {
    let monitor = StatsMonitor::new();
    let ctx = FetchContext::new("SeaLion");

    monitor.on_fetch_complete(&ctx, Duration::from_millis(10), &FetchOutcome::Rows(5));
    monitor.on_fetch_complete(&ctx, Duration::from_millis(20), &FetchOutcome::Rows(3));
    monitor.on_fetch_complete(
        &FetchContext::new("Location"),
        Duration::from_millis(5),
        &FetchOutcome::error("boom".into()),
    );

    let stats = monitor.stats();
    assert_eq!(stats.total_fetches, 3);
    assert_eq!(stats.failed_fetches, 1);
    assert_eq!(stats.total_rows, 8);
    assert_eq!(stats.total_duration, Duration::from_millis(35));
    assert_eq!(stats.max_duration, Duration::from_millis(20));
    assert_eq!(monitor.fetches_for("SeaLion"), 2);
    assert_eq!(monitor.fetches_for("Location"), 1);
    assert_eq!(monitor.fetches_for("Climate"), 0);

    monitor.reset();
    assert_eq!(monitor.stats(), FetchStats::default());
}

#[test]
fn test_fetch_outcome_truncation() {
    let long = "x".repeat(600);
    match FetchOutcome::error(long) {
        FetchOutcome::Error(msg) => {
            assert!(msg.ends_with("..."));
            assert_eq!(msg.len(), 515);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(FetchOutcome::error("short".into()).to_string(), "error: short");
    assert_eq!(FetchOutcome::Rows(2).to_string(), "2 rows");
}

#[test]
fn test_fetch_outcome_truncation_respects_char_boundary() {
    let long = "é".repeat(400);
    let FetchOutcome::Error(msg) = FetchOutcome::error(long) else {
        panic!("expected error outcome");
    };
    assert!(msg.len() <= 515);
    assert!(msg.ends_with("..."));
}

#[test]
fn test_composite_monitor_fans_out() {
    let a = Arc::new(StatsMonitor::new());
    let b = Arc::new(StatsMonitor::new());
    let composite = CompositeMonitor::new()
        .add(NoopMonitor)
        .add_arc(a.clone())
        .add_arc(b.clone());
    assert!(!composite.is_empty());

    let ctx = FetchContext::new("SeaLion").with_tag("list").with_field("page", "1");
    composite.on_fetch_start(&ctx);
    composite.on_fetch_complete(&ctx, Duration::from_millis(1), &FetchOutcome::Rows(1));

    assert_eq!(a.fetch_count(), 1);
    assert_eq!(b.fetch_count(), 1);
}

#[test]
fn test_violation_log() {
    let log = ViolationLog::new();
    assert!(log.is_empty());

    let record = sea_lion();
    log.on_violation(&UnsealedAttributeAccess::related_field("location", "SeaLion"), &record);
    log.on_violation(&UnsealedAttributeAccess::deferred_field("weight", "SeaLion"), &record);

    assert_eq!(log.len(), 2);
    assert_eq!(
        log.messages(),
        vec![
            "Attempt to fetch related field \"location\" on sealed <SeaLion instance>".to_string(),
            "Attempt to fetch deferred field \"weight\" on sealed <SeaLion instance>".to_string(),
        ]
    );
    assert_eq!(log.entries()[1].name, "weight");

    log.clear();
    assert!(log.is_empty());
}
