//! The unit of work tying a registry, a backend and the reporting policy together.

use crate::backend::{Backend, FetchRequest, FetchedRow};
use crate::config::{SealConfig, SealMode};
use crate::error::{SealError, SealResult, UnsealedAttributeAccess};
use crate::monitor::{CompositeMonitor, FetchContext, FetchMonitor, FetchOutcome, ViolationMonitor};
use crate::query::QuerySet;
use crate::record::{Record, Row};
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Instant;

/// Every fetch and every guarded access goes through a session.
///
/// # Example
///
/// ```ignore
/// let session = Session::new(registry.clone(), backend).with_config(SealConfig::new().strict());
/// let sea_lion = session.objects("SeaLion")?.seal()?.get(&session)?;
/// assert!(sea_lion.related(&session, "location").is_err());
/// ```
pub struct Session<B: Backend> {
    registry: Arc<Registry>,
    backend: B,
    config: SealConfig,
    monitors: CompositeMonitor,
    violation_monitors: Vec<Arc<dyn ViolationMonitor>>,
}

impl<B: Backend> Session<B> {
    /// Create a session with advisory reporting.
    pub fn new(registry: Arc<Registry>, backend: B) -> Self {
        Self {
            registry,
            backend,
            config: SealConfig::default(),
            monitors: CompositeMonitor::new(),
            violation_monitors: Vec::new(),
        }
    }

    /// Set the reporting configuration.
    pub fn with_config(mut self, config: SealConfig) -> Self {
        self.config = config;
        self
    }

    /// Fail hard on every violation.
    pub fn strict(mut self) -> Self {
        self.config = self.config.strict();
        self
    }

    /// Add a fetch monitor.
    pub fn with_monitor<M: FetchMonitor + 'static>(mut self, monitor: M) -> Self {
        self.monitors = self.monitors.add(monitor);
        self
    }

    /// Add an Arc-wrapped fetch monitor.
    pub fn with_monitor_arc(mut self, monitor: Arc<dyn FetchMonitor>) -> Self {
        self.monitors = self.monitors.add_arc(monitor);
        self
    }

    /// Add a violation monitor.
    pub fn with_violation_monitor<M: ViolationMonitor + 'static>(mut self, monitor: M) -> Self {
        self.violation_monitors.push(Arc::new(monitor));
        self
    }

    /// Add an Arc-wrapped violation monitor.
    pub fn with_violation_monitor_arc(mut self, monitor: Arc<dyn ViolationMonitor>) -> Self {
        self.violation_monitors.push(monitor);
        self
    }

    /// The model registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The fetch backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The reporting configuration.
    pub fn config(&self) -> &SealConfig {
        &self.config
    }

    /// Base queryset of the model's default manager.
    pub fn objects(&self, model: &str) -> SealResult<QuerySet> {
        self.registry.objects(model)
    }

    /// Base queryset of a named manager.
    pub fn manager(&self, model: &str, name: &str) -> SealResult<QuerySet> {
        self.registry.manager(model, name)
    }

    /// Build a record in memory, without any fetch.
    pub fn instantiate(&self, model: &str, row: Row) -> SealResult<Record> {
        self.registry.instantiate(model, row)
    }

    /// Report a guarded access on a sealed record.
    ///
    /// Returns `Ok(())` when the caller should carry on with the lazy fetch.
    pub(crate) fn report(&self, violation: UnsealedAttributeAccess, record: &Record) -> SealResult<()> {
        match self.config.mode_for(violation.kind) {
            SealMode::Disabled => Ok(()),
            SealMode::WarnOnly => {
                tracing::warn!(
                    target: "sealorm::violation",
                    model = %violation.model,
                    kind = %violation.kind,
                    name = %violation.name,
                    "{violation}"
                );
                self.notify(&violation, record);
                Ok(())
            }
            SealMode::Strict => {
                self.notify(&violation, record);
                Err(SealError::Unsealed(violation))
            }
        }
    }

    fn notify(&self, violation: &UnsealedAttributeAccess, record: &Record) {
        for monitor in &self.violation_monitors {
            monitor.on_violation(violation, record);
        }
    }

    /// Run a request through the backend, notifying fetch monitors.
    pub(crate) fn fetch(&self, request: &FetchRequest) -> SealResult<Vec<FetchedRow>> {
        let ctx = FetchContext::from_request(request);
        self.monitors.on_fetch_start(&ctx);

        let start = Instant::now();
        let result = self.backend.fetch(&self.registry, request);
        let duration = start.elapsed();

        let outcome = match &result {
            Ok(rows) => FetchOutcome::Rows(rows.len()),
            Err(e) => FetchOutcome::error(e.to_string()),
        };
        self.monitors.on_fetch_complete(&ctx, duration, &outcome);
        if let Some(threshold) = self.config.slow_fetch_threshold
            && duration > threshold
        {
            self.monitors.on_slow_fetch(&ctx, duration);
        }

        tracing::debug!(
            target: "sealorm::fetch",
            model = %request.model,
            tag = request.tag.as_deref().unwrap_or("-"),
            joins = ctx.joins,
            outcome = %outcome,
            elapsed_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
            "fetch"
        );
        result
    }
}

impl<B: Backend + std::fmt::Debug> std::fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("violation_monitors", &self.violation_monitors.len())
            .finish_non_exhaustive()
    }
}
