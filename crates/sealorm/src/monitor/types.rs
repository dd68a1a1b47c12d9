use crate::backend::FetchRequest;
use crate::error::UnsealedAttributeAccess;
use crate::record::Record;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Context information about the fetch being executed.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Concrete model of the produced rows.
    pub model: String,
    /// Optional query name/tag for identification.
    pub tag: Option<String>,
    /// Number of columns loaded at the top level.
    pub columns: usize,
    /// Number of eager joins (all levels).
    pub joins: usize,
    /// Optional structured fields for observability (low-cardinality).
    pub fields: BTreeMap<String, String>,
}

impl FetchContext {
    /// Create a new fetch context.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tag: None,
            columns: 0,
            joins: 0,
            fields: BTreeMap::new(),
        }
    }

    pub(crate) fn from_request(request: &FetchRequest) -> Self {
        fn count(joins: &[crate::backend::JoinRequest]) -> usize {
            joins.iter().map(|j| 1 + count(&j.joins)).sum()
        }
        Self {
            model: request.model.clone(),
            tag: request.tag.clone(),
            columns: request.columns.len(),
            joins: count(&request.joins),
            fields: BTreeMap::new(),
        }
    }

    /// Add a tag to identify this fetch.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Add a structured field (low-cardinality).
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Maximum length for error messages in `FetchOutcome::Error`.
const MAX_ERROR_LEN: usize = 512;

/// Result of a fetch for monitoring purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Fetch returned rows.
    Rows(usize),
    /// Fetch failed with an error (truncated to 512 characters).
    Error(String),
}

impl FetchOutcome {
    /// Create an error outcome, truncating the message.
    pub fn error(msg: String) -> Self {
        if msg.len() <= MAX_ERROR_LEN {
            return Self::Error(msg);
        }
        let mut end = MAX_ERROR_LEN;
        while end > 0 && !msg.is_char_boundary(end) {
            end -= 1;
        }
        Self::Error(format!("{}...", &msg[..end]))
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Rows(n) => write!(f, "{n} rows"),
            FetchOutcome::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Trait for monitoring the fetches a session issues.
pub trait FetchMonitor: Send + Sync {
    /// Called before a fetch is executed.
    ///
    /// Default implementation does nothing.
    fn on_fetch_start(&self, _ctx: &FetchContext) {}

    /// Called after a fetch completes (success or failure).
    fn on_fetch_complete(&self, ctx: &FetchContext, duration: Duration, outcome: &FetchOutcome);

    /// Called when a slow fetch is detected.
    ///
    /// Default implementation does nothing.
    fn on_slow_fetch(&self, _ctx: &FetchContext, _duration: Duration) {}
}

/// Trait receiving violations reported on sealed records.
///
/// Advisory reports reach monitors before the lazy fetch runs; hard failures
/// reach them before the error is returned.
pub trait ViolationMonitor: Send + Sync {
    /// Called for every reported violation.
    fn on_violation(&self, violation: &UnsealedAttributeAccess, record: &Record);
}
