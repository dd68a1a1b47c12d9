//! Fetch and violation monitoring.
//!
//! This module provides traits and utilities for:
//! - Counting the fetches a session issues (per model)
//! - Collecting advisory violation reports
//! - Fanning events out to several monitors
//!
//! # Example
//!
//! ```rust,ignore
//! use sealorm::monitor::{StatsMonitor, ViolationLog};
//! use std::sync::Arc;
//!
//! let stats = Arc::new(StatsMonitor::new());
//! let log = Arc::new(ViolationLog::new());
//! let session = Session::new(registry, backend)
//!     .with_monitor_arc(stats.clone())
//!     .with_violation_monitor_arc(log.clone());
//!
//! let sea_lion = session.objects("SeaLion")?.seal()?.get(&session)?;
//! sea_lion.related(&session, "location")?;
//!
//! assert_eq!(stats.stats().total_fetches, 2);
//! assert_eq!(log.len(), 1);
//! ```

mod monitors;
mod types;

#[cfg(test)]
mod tests;

pub use monitors::{CompositeMonitor, FetchStats, NoopMonitor, StatsMonitor, ViolationLog};
pub use types::{FetchContext, FetchMonitor, FetchOutcome, ViolationMonitor};
