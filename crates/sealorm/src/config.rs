//! Session configuration: how sealed access violations are reported.

use crate::error::ViolationKind;
use std::collections::BTreeSet;
use std::time::Duration;

/// How violations are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SealMode {
    /// No report; the lazy fetch goes through silently.
    Disabled,
    /// Advisory report (warning + violation monitors), then the lazy fetch.
    #[default]
    WarnOnly,
    /// Hard failure: the access returns `SealError::Unsealed`.
    Strict,
}

/// Configuration for a [`Session`](crate::Session).
///
/// By default violations are advisory.
#[derive(Debug, Clone, Default)]
pub struct SealConfig {
    /// Default handling of violations.
    pub mode: SealMode,
    /// Violation kinds that always fail hard (unless disabled).
    pub escalations: BTreeSet<ViolationKind>,
    /// Fetches slower than this trigger `on_slow_fetch` callbacks.
    pub slow_fetch_threshold: Option<Duration>,
}

impl SealConfig {
    /// Create a new configuration with defaults (advisory reports).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default handling mode.
    pub fn mode(mut self, mode: SealMode) -> Self {
        self.mode = mode;
        self
    }

    /// Fail hard on every violation.
    pub fn strict(self) -> Self {
        self.mode(SealMode::Strict)
    }

    /// Report violations as warnings.
    pub fn warn_only(self) -> Self {
        self.mode(SealMode::WarnOnly)
    }

    /// Turn violation reporting off.
    pub fn disabled(self) -> Self {
        self.mode(SealMode::Disabled)
    }

    /// Always fail hard on this kind of violation.
    pub fn escalate(mut self, kind: ViolationKind) -> Self {
        self.escalations.insert(kind);
        self
    }

    /// Set the slow fetch threshold.
    pub fn with_slow_fetch_threshold(mut self, threshold: Duration) -> Self {
        self.slow_fetch_threshold = Some(threshold);
        self
    }

    /// Effective handling of one violation kind.
    pub fn mode_for(&self, kind: ViolationKind) -> SealMode {
        match self.mode {
            SealMode::Disabled => SealMode::Disabled,
            SealMode::WarnOnly if self.escalations.contains(&kind) => SealMode::Strict,
            mode => mode,
        }
    }
}
