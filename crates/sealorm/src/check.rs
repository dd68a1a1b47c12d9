//! Startup self-check of model declarations.

use crate::config::SealMode;
use crate::error::{SealError, SealResult};
use crate::registry::Registry;
use std::fmt;

/// Severity of a check issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SealIssueLevel {
    /// Warning - may be intentional.
    Warning,
    /// Error - likely a bug.
    Error,
}

/// A problem found by [`Registry::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealIssue {
    /// Stable identifier (`seal.E001`).
    pub id: &'static str,
    /// Severity level.
    pub level: SealIssueLevel,
    /// Human-readable message.
    pub message: String,
    /// Suggested fix.
    pub hint: String,
    /// Model the issue was found on.
    pub model: String,
    /// Offending manager, if any.
    pub manager: Option<String>,
}

impl fmt::Display for SealIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ({}) {}", self.model, self.id, self.message)?;
        if !self.hint.is_empty() {
            write!(f, "\n\tHINT: {}", self.hint)?;
        }
        Ok(())
    }
}

impl Registry {
    /// Flag seal-capable managers installed on models that did not opt in.
    pub fn check(&self) -> Vec<SealIssue> {
        let mut issues = Vec::new();
        for meta in self.models() {
            if meta.is_sealable() {
                continue;
            }
            for manager in meta.managers().iter().filter(|m| m.is_sealable()) {
                issues.push(SealIssue {
                    id: "seal.E001",
                    level: SealIssueLevel::Error,
                    message: format!("{} can only be used on sealable models.", manager.origin()),
                    hint: format!("Make {} sealable with ModelDef::sealable().", meta.name()),
                    model: meta.name().to_string(),
                    manager: Some(manager.name().to_string()),
                });
            }
        }
        issues
    }

    /// Run [`Registry::check`] and handle its issues according to `mode`.
    pub fn validate(&self, mode: SealMode) -> SealResult<()> {
        let issues = self.check();
        match mode {
            SealMode::Disabled => Ok(()),
            SealMode::WarnOnly => {
                for issue in &issues {
                    tracing::warn!(target: "sealorm::registry", id = issue.id, "{issue}");
                }
                Ok(())
            }
            SealMode::Strict => {
                let errors: Vec<String> = issues
                    .iter()
                    .filter(|i| i.level == SealIssueLevel::Error)
                    .map(ToString::to_string)
                    .collect();
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(SealError::configuration(format!(
                        "model check failed: {}",
                        errors.join("; ")
                    )))
                }
            }
        }
    }
}
