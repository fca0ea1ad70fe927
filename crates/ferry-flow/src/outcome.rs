//! Terminal results of a workflow run.
//!
//! A run ends in exactly one [`WorkflowOutcome`]: the caller's original
//! context on success, or a [`FailureReport`] describing what went wrong.
//! Failure text never contains secret override values.

use std::fmt;

use serde::{Deserialize, Serialize};

use ferry_core::{scrub_secrets, WorkflowId};

use crate::dispatch::{DispatchError, DispatchErrorKind, ErrorClass};

/// Why a workflow failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// `start_job` failed permanently or exhausted its retries.
    DispatchStartFailure,
    /// `check_status` failed permanently or exhausted its retries.
    StatusCheckFailure,
    /// `start_job` succeeded without returning a handle.
    ContractViolation,
    /// The remote job reported a job-logic failure.
    JobFailed,
    /// The remote facility reported an infrastructure fault.
    JobFaulted,
    /// The remote status value was not recognized.
    UnrecognizedStatus,
    /// The job stayed in progress past the configured poll ceiling.
    PollLimitExceeded,
    /// The run was cancelled by its invoker.
    Cancelled,
    /// The request failed admission checks.
    InvalidRequest,
}

impl FailureKind {
    /// Returns the default category for this kind.
    #[must_use]
    pub const fn category(&self) -> FailureCategory {
        match self {
            Self::DispatchStartFailure
            | Self::StatusCheckFailure
            | Self::ContractViolation
            | Self::JobFaulted => FailureCategory::Dispatch,
            Self::JobFailed => FailureCategory::JobLogic,
            Self::UnrecognizedStatus => FailureCategory::UnrecognizedStatus,
            Self::PollLimitExceeded | Self::Cancelled | Self::InvalidRequest => {
                FailureCategory::Operator
            }
        }
    }

    /// Returns the human-readable reason prefix.
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::DispatchStartFailure => "dispatch start failure",
            Self::StatusCheckFailure => "status check failure",
            Self::ContractViolation => "dispatcher contract violation",
            Self::JobFailed => "job failed",
            Self::JobFaulted => "job faulted",
            Self::UnrecognizedStatus => "unrecognized status",
            Self::PollLimitExceeded => "poll limit exceeded",
            Self::Cancelled => "cancelled",
            Self::InvalidRequest => "invalid request",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Coarse grouping of failures for invokers and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Could not obtain credentials for the target.
    Delegation,
    /// The remote facility could not be driven.
    Dispatch,
    /// The remote job ran and failed.
    JobLogic,
    /// The remote facility reported a status outside the known set.
    UnrecognizedStatus,
    /// Stopped by configuration or the invoker.
    Operator,
}

impl FailureCategory {
    /// Returns the metric label for this category.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Delegation => "delegation",
            Self::Dispatch => "dispatch",
            Self::JobLogic => "job_logic",
            Self::UnrecognizedStatus => "unrecognized_status",
            Self::Operator => "operator",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Scrubbed summary of the last dispatcher error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Retry class of the error.
    pub class: ErrorClass,
    /// Failing side.
    pub kind: DispatchErrorKind,
    /// Provider message with secret values removed.
    pub message: String,
}

impl ErrorInfo {
    /// Builds a scrubbed summary of a dispatcher error.
    #[must_use]
    pub fn scrubbed(err: &DispatchError, secrets: &[&str]) -> Self {
        Self {
            class: err.class,
            kind: err.kind,
            message: scrub_secrets(&err.message, secrets),
        }
    }
}

/// Description of a failed workflow.
///
/// `reason`, `last_status` and the error message are scrubbed of secret
/// override values. `kind`, `category` and `error_class` are fixed
/// vocabulary and are never scrubbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// What failed.
    pub kind: FailureKind,
    /// Coarse category; `Delegation` when credentials could not be obtained.
    pub category: FailureCategory,
    /// Human-readable reason.
    pub reason: String,
    /// Last remote status string observed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
    /// Retry class of the last dispatcher error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    /// Last dispatcher error, scrubbed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl FailureReport {
    /// Creates a report with the kind's default category and reason.
    #[must_use]
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            category: kind.category(),
            reason: kind.describe().to_string(),
            last_status: None,
            error_class: None,
            error: None,
        }
    }

    /// Creates a report for a failed dispatcher call.
    ///
    /// Delegation errors are categorized as [`FailureCategory::Delegation`].
    #[must_use]
    pub fn from_dispatch_error(kind: FailureKind, err: &DispatchError, secrets: &[&str]) -> Self {
        let mut report = Self::new(kind);
        if err.kind == DispatchErrorKind::Delegation {
            report.category = FailureCategory::Delegation;
        }
        report.error_class = Some(err.class);
        report.error = Some(ErrorInfo::scrubbed(err, secrets));
        report
    }

    /// Replaces the reason, scrubbing secret values.
    #[must_use]
    pub fn with_reason(mut self, reason: &str, secrets: &[&str]) -> Self {
        self.reason = scrub_secrets(reason, secrets);
        self
    }

    /// Records the last observed remote status, scrubbing secret values.
    #[must_use]
    pub fn with_last_status(mut self, status: &str, secrets: &[&str]) -> Self {
        self.last_status = Some(scrub_secrets(status, secrets));
        self
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.category)?;
        if let Some(error) = &self.error {
            write!(f, ": {}", error.message)?;
        }
        Ok(())
    }
}

/// Terminal outcome of a workflow.
///
/// Serializes untagged: success is exactly the original context; failure is
/// the [`FailureReport`] object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorkflowOutcome<C> {
    /// The job succeeded; carries the original context unchanged.
    Succeeded(C),
    /// The workflow failed.
    Failed(FailureReport),
}

impl<C> WorkflowOutcome<C> {
    /// Returns true on success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Returns the failure report, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&FailureReport> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(report) => Some(report),
        }
    }

    /// Returns the status label (`SUCCEEDED` or `FAILED`).
    #[must_use]
    pub const fn status_label(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "SUCCEEDED",
            Self::Failed(_) => "FAILED",
        }
    }
}

/// Counters collected during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStats {
    /// `start_job` calls made, including retries.
    pub start_attempts: u32,
    /// `check_status` calls made, including retries.
    pub status_checks: u32,
    /// Poll-interval waits taken.
    pub waits: u32,
}

/// Everything a run returns to its invoker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport<C> {
    /// Identifier of the run.
    pub workflow_id: WorkflowId,
    /// Terminal outcome.
    pub outcome: WorkflowOutcome<C>,
    /// Call and wait counters.
    pub stats: WorkflowStats,
}

impl<C> WorkflowReport<C> {
    /// Returns true on success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Consumes the report, returning the outcome.
    #[must_use]
    pub fn into_outcome(self) -> WorkflowOutcome<C> {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vocabulary_fields_are_not_scrubbed() {
        let err = DispatchError::permanent("dispatch rejected value dispatch");
        let report =
            FailureReport::from_dispatch_error(FailureKind::DispatchStartFailure, &err, &["dispatch"]);

        assert_eq!(report.category, FailureCategory::Dispatch);
        assert_eq!(report.reason, "dispatch start failure");
        assert_eq!(
            report.error.map(|e| e.message),
            Some("REDACTED rejected value REDACTED".to_string())
        );
    }

    #[test]
    fn categories_separate_delegation_from_job_logic() {
        let target_err: DispatchError = crate::credentials::DelegationError::denied(
            &crate::request::DelegationTarget::new("acct-A/role-X"),
            "untrusted",
        )
        .into();
        let delegation =
            FailureReport::from_dispatch_error(FailureKind::DispatchStartFailure, &target_err, &[]);
        assert_eq!(delegation.category, FailureCategory::Delegation);
        assert_eq!(delegation.reason, "dispatch start failure");

        let remote = FailureReport::from_dispatch_error(
            FailureKind::DispatchStartFailure,
            &DispatchError::transient("throttled"),
            &[],
        );
        assert_eq!(remote.category, FailureCategory::Dispatch);

        assert_eq!(FailureKind::JobFailed.category(), FailureCategory::JobLogic);
        assert_eq!(
            FailureKind::UnrecognizedStatus.category(),
            FailureCategory::UnrecognizedStatus
        );
    }

    #[test]
    fn report_scrubs_secrets() {
        let err = DispatchError::permanent("variable DB_PASSWORD=hunter2 rejected");
        let report =
            FailureReport::from_dispatch_error(FailureKind::DispatchStartFailure, &err, &["hunter2"])
                .with_reason("rejected hunter2", &["hunter2"]);

        let rendered = serde_json::to_string(&report).unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(!report.to_string().contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = FailureReport::new(FailureKind::JobFailed).with_last_status("FAILED", &[]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["kind"], json!("job_failed"));
        assert_eq!(value["category"], json!("job_logic"));
        assert_eq!(value["lastStatus"], json!("FAILED"));
        assert!(value.get("errorClass").is_none());
    }

    #[test]
    fn success_outcome_serializes_as_context() {
        let outcome: WorkflowOutcome<serde_json::Value> = WorkflowOutcome::Succeeded(json!({"tag": "r1"}));
        assert_eq!(serde_json::to_value(&outcome).unwrap(), json!({"tag": "r1"}));
        assert_eq!(outcome.status_label(), "SUCCEEDED");
        assert!(outcome.failure().is_none());
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::DispatchStartFailure.to_string(), "dispatch start failure");
        assert_eq!(FailureCategory::JobLogic.to_string(), "job_logic");
    }
}
