use super::types::{FetchContext, FetchMonitor, FetchOutcome, ViolationMonitor};
use crate::error::UnsealedAttributeAccess;
use crate::record::Record;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A no-op monitor that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl FetchMonitor for NoopMonitor {
    fn on_fetch_complete(&self, _ctx: &FetchContext, _duration: Duration, _outcome: &FetchOutcome) {}
}

impl ViolationMonitor for NoopMonitor {
    fn on_violation(&self, _violation: &UnsealedAttributeAccess, _record: &Record) {}
}

/// A monitor that tracks fetch statistics.
#[derive(Debug, Default)]
pub struct StatsMonitor {
    total_fetches: AtomicU64,
    failed_fetches: AtomicU64,
    total_rows: AtomicU64,
    total_duration_nanos: AtomicU64,
    max_duration_nanos: AtomicU64,
    per_model: Mutex<BTreeMap<String, u64>>,
}

/// Collected fetch statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Total number of fetches executed.
    pub total_fetches: u64,
    /// Total number of failed fetches.
    pub failed_fetches: u64,
    /// Total number of rows produced.
    pub total_rows: u64,
    /// Total execution time.
    pub total_duration: Duration,
    /// Slowest fetch duration.
    pub max_duration: Duration,
    /// Fetches per concrete model.
    pub per_model: BTreeMap<String, u64>,
}

impl StatsMonitor {
    /// Create a new stats monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current statistics.
    pub fn stats(&self) -> FetchStats {
        FetchStats {
            total_fetches: self.total_fetches.load(Ordering::Relaxed),
            failed_fetches: self.failed_fetches.load(Ordering::Relaxed),
            total_rows: self.total_rows.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(self.total_duration_nanos.load(Ordering::Relaxed)),
            max_duration: Duration::from_nanos(self.max_duration_nanos.load(Ordering::Relaxed)),
            per_model: lock(&self.per_model).clone(),
        }
    }

    /// Number of fetches executed so far.
    pub fn fetch_count(&self) -> u64 {
        self.total_fetches.load(Ordering::Relaxed)
    }

    /// Number of fetches of one concrete model.
    pub fn fetches_for(&self, model: &str) -> u64 {
        lock(&self.per_model).get(model).copied().unwrap_or(0)
    }

    /// Reset all statistics.
    pub fn reset(&self) {
        self.total_fetches.store(0, Ordering::Relaxed);
        self.failed_fetches.store(0, Ordering::Relaxed);
        self.total_rows.store(0, Ordering::Relaxed);
        self.total_duration_nanos.store(0, Ordering::Relaxed);
        self.max_duration_nanos.store(0, Ordering::Relaxed);
        lock(&self.per_model).clear();
    }
}

impl FetchMonitor for StatsMonitor {
    fn on_fetch_complete(&self, ctx: &FetchContext, duration: Duration, outcome: &FetchOutcome) {
        let duration_nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);

        self.total_fetches.fetch_add(1, Ordering::Relaxed);
        let prev_total = self
            .total_duration_nanos
            .fetch_add(duration_nanos, Ordering::Relaxed);
        if prev_total.checked_add(duration_nanos).is_none() {
            // Saturate instead of wrapping.
            self.total_duration_nanos.store(u64::MAX, Ordering::Relaxed);
        }
        self.max_duration_nanos
            .fetch_max(duration_nanos, Ordering::Relaxed);

        match outcome {
            FetchOutcome::Rows(n) => {
                self.total_rows
                    .fetch_add(u64::try_from(*n).unwrap_or(u64::MAX), Ordering::Relaxed);
            }
            FetchOutcome::Error(_) => {
                self.failed_fetches.fetch_add(1, Ordering::Relaxed);
            }
        }

        *lock(&self.per_model).entry(ctx.model.clone()).or_default() += 1;
    }
}

/// A composite monitor that delegates to multiple monitors.
pub struct CompositeMonitor {
    monitors: Vec<Arc<dyn FetchMonitor>>,
}

impl CompositeMonitor {
    /// Create an empty composite monitor.
    pub fn new() -> Self {
        Self {
            monitors: Vec::new(),
        }
    }

    /// Add a monitor.
    #[allow(clippy::should_implement_trait)]
    pub fn add<M: FetchMonitor + 'static>(mut self, monitor: M) -> Self {
        self.monitors.push(Arc::new(monitor));
        self
    }

    /// Add an Arc-wrapped monitor.
    pub fn add_arc(mut self, monitor: Arc<dyn FetchMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Whether no monitor is registered.
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

impl Default for CompositeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchMonitor for CompositeMonitor {
    fn on_fetch_start(&self, ctx: &FetchContext) {
        for monitor in &self.monitors {
            monitor.on_fetch_start(ctx);
        }
    }

    fn on_fetch_complete(&self, ctx: &FetchContext, duration: Duration, outcome: &FetchOutcome) {
        for monitor in &self.monitors {
            monitor.on_fetch_complete(ctx, duration, outcome);
        }
    }

    fn on_slow_fetch(&self, ctx: &FetchContext, duration: Duration) {
        for monitor in &self.monitors {
            monitor.on_slow_fetch(ctx, duration);
        }
    }
}

/// Collects every reported violation, in report order.
#[derive(Debug, Default)]
pub struct ViolationLog {
    entries: Mutex<Vec<UnsealedAttributeAccess>>,
}

impl ViolationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reported violations so far.
    pub fn entries(&self) -> Vec<UnsealedAttributeAccess> {
        lock(&self.entries).clone()
    }

    /// Rendered violation messages.
    pub fn messages(&self) -> Vec<String> {
        lock(&self.entries).iter().map(ToString::to_string).collect()
    }

    /// Number of reported violations.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether nothing was reported.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl ViolationMonitor for ViolationLog {
    fn on_violation(&self, violation: &UnsealedAttributeAccess, _record: &Record) {
        lock(&self.entries).push(violation.clone());
    }
}
