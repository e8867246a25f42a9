//! Step reports
//!
//! Every executed interaction yields a [`StepReport`]. Transport, timeout and
//! validation problems are recorded as [`Failure`]s on the report; none of
//! them stops the run loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::data::{Node, NodeList};
use crate::matcher::ValidationError;
use crate::plugin::PluginError;
use crate::script::ActionKind;

/// How serious a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Noted, the step still passes.
    Warning,
    /// The step failed.
    Error,
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The plugin call returned an error.
    Plugin,
    /// The call exceeded its deadline.
    Timeout,
    /// The call was cancelled by engine shutdown.
    Cancelled,
    /// Received content did not satisfy the expected pattern.
    Validation,
    /// A different message arrived than the one expected.
    UnexpectedMessage,
    /// The plugin panicked.
    Internal,
}

/// A failure scoped to one interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Severity.
    pub severity: Severity,
    /// Category.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
    /// Unsatisfied expected node, for validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Node>,
}

impl Failure {
    /// Error-severity failure.
    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            expected: None,
        }
    }

    /// Warning-severity failure.
    pub fn warning(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message)
        }
    }

    /// Deadline expiry.
    pub fn timeout(deadline: Duration) -> Self {
        Self::error(
            FailureKind::Timeout,
            format!("no completion within {} ms", deadline.as_millis()),
        )
    }
}

impl From<PluginError> for Failure {
    fn from(err: PluginError) -> Self {
        let kind = match err {
            PluginError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Plugin,
        };
        Failure::error(kind, err.to_string())
    }
}

impl From<ValidationError> for Failure {
    fn from(err: ValidationError) -> Self {
        Self {
            expected: err.witness().cloned(),
            ..Failure::error(FailureKind::Validation, err.to_string())
        }
    }
}

/// Outcome of one executed interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// Pass number, starting at 1.
    pub flow_index: u64,
    /// Position within the pass, starting at 1.
    pub step_index: usize,
    /// Interaction summary, e.g. `Ping: Me>Peer`.
    pub action: String,
    /// Interaction kind.
    pub kind: ActionKind,
    /// Correlation identifier of message interactions.
    pub correlation: Option<Uuid>,
    /// When dispatch began.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time spent.
    pub elapsed: Duration,
    /// Content returned by the plugin.
    pub result: NodeList,
    /// Failures recorded for this interaction.
    pub failures: Vec<Failure>,
}

impl StepReport {
    /// Whether no error-severity failure was recorded.
    pub fn passed(&self) -> bool {
        self.failures
            .iter()
            .all(|failure| failure.severity < Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::validate;

    #[test]
    fn test_validation_failure_carries_witness() {
        let expected: NodeList = vec![Node::with_value("Seq", 1i32)].into();
        let err = validate(&expected, &NodeList::new()).unwrap_err();
        let failure = Failure::from(err);

        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(failure.expected.unwrap().name, "Seq");
    }

    #[test]
    fn test_warnings_do_not_fail_the_step() {
        let mut report = StepReport {
            flow_index: 1,
            step_index: 1,
            action: "Ping: Me<Peer".into(),
            kind: ActionKind::Receive,
            correlation: None,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            result: NodeList::new(),
            failures: vec![Failure::warning(FailureKind::UnexpectedMessage, "got Pong")],
        };
        assert!(report.passed());

        report.failures.push(PluginError::Cancelled.into());
        assert!(!report.passed());
        assert_eq!(report.failures[1].kind, FailureKind::Cancelled);
    }
}
