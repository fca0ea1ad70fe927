//! Remote job dispatch.
//!
//! This module provides:
//!
//! - [`RemoteDispatcher`]: The two operations the workflow controller uses
//!   (`start_job`, `check_status`)
//! - [`JobFacility`]: A remote job service reached with a scoped credential
//! - [`BrokeredDispatcher`]: Composes a [`CredentialBroker`] with a facility
//! - [`StatusObservation`]: Normalized view of a remote job status
//! - [`DispatchError`]: Failures classified as transient or permanent
//!
//! ## Design Principles
//!
//! - **Stateless**: Each call assumes the target again; the broker may cache
//! - **Opaque handles**: An [`ExecutionHandle`] is only meaningful to the
//!   facility that issued it
//! - **Classified errors**: Every failure is transient or permanent so the
//!   controller can decide whether to retry

pub mod codebuild;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument};

use ferry_core::observability::dispatch_span;

use crate::credentials::{CredentialBroker, DelegationError, ScopedCredential, DEFAULT_CREDENTIAL_TTL};
use crate::metrics::{FlowMetrics, TimingGuard};
use crate::request::{effective_overrides, DelegationTarget, EnvironmentOverride};

/// Result type for dispatcher calls.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Opaque identifier of one started remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHandle(String);

impl ExecutionHandle {
    /// Wraps a facility-issued id. Returns `None` for an empty id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Returns the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized status of a remote execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished with a job-logic failure.
    Failed,
    /// Infrastructure fault, or a status value that was not recognized.
    Faulted,
}

impl ExecutionStatus {
    /// Returns true if the execution will not change status again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Returns the metric label for this status.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Faulted => "faulted",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Faulted => "FAULTED",
        };
        f.write_str(s)
    }
}

/// One status reading: the raw remote value and its normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusObservation {
    /// Normalized status.
    pub status: ExecutionStatus,
    /// Status string exactly as the facility reported it.
    pub remote_status: String,
    /// False if `remote_status` did not map to a known status.
    pub recognized: bool,
}

impl StatusObservation {
    /// Normalizes a facility status string.
    ///
    /// `IN_PROGRESS` and `SUCCEEDED` map directly. `FAILED`, `TIMED_OUT` and
    /// `STOPPED` are job failures. `FAULT` is an infrastructure fault. Any
    /// other value is reported as [`ExecutionStatus::Faulted`] with
    /// `recognized == false`.
    #[must_use]
    pub fn from_remote(raw: impl Into<String>) -> Self {
        let remote_status = raw.into();
        let (status, recognized) = match remote_status.as_str() {
            "IN_PROGRESS" => (ExecutionStatus::InProgress, true),
            "SUCCEEDED" => (ExecutionStatus::Succeeded, true),
            "FAILED" | "TIMED_OUT" | "STOPPED" => (ExecutionStatus::Failed, true),
            "FAULT" => (ExecutionStatus::Faulted, true),
            _ => (ExecutionStatus::Faulted, false),
        };
        Self {
            status,
            remote_status,
            recognized,
        }
    }
}

/// Whether a failed call may succeed if repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Throttling, timeouts, service unavailability.
    Transient,
    /// Authorization failures, missing job definitions, malformed input.
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        })
    }
}

/// Which side of the dispatcher failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    /// The credential broker could not delegate into the target.
    Delegation,
    /// The remote job facility rejected or failed the call.
    Remote,
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delegation => "delegation",
            Self::Remote => "remote",
        })
    }
}

/// A classified dispatcher failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class} {kind} error: {message}")]
pub struct DispatchError {
    /// Retry class.
    pub class: ErrorClass,
    /// Failing side.
    pub kind: DispatchErrorKind,
    /// Provider message. May contain anything the provider echoed back.
    pub message: String,
}

impl DispatchError {
    /// Creates a transient remote error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            kind: DispatchErrorKind::Remote,
            message: message.into(),
        }
    }

    /// Creates a permanent remote error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            kind: DispatchErrorKind::Remote,
            message: message.into(),
        }
    }

    /// Returns true if the call may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

impl From<DelegationError> for DispatchError {
    fn from(err: DelegationError) -> Self {
        Self {
            class: err.class(),
            kind: DispatchErrorKind::Delegation,
            message: err.to_string(),
        }
    }
}

/// The two remote operations the workflow controller depends on.
///
/// Implementations must be stateless between calls and must not retry
/// internally; retry policy belongs to the caller.
///
/// ## Example
///
/// ```rust,ignore
/// use ferry_flow::dispatch::RemoteDispatcher;
///
/// let handle = dispatcher.start_job(&target, "proj-1", &overrides).await?;
/// let observation = dispatcher.check_status(&target, &handle.unwrap()).await?;
/// ```
#[async_trait]
pub trait RemoteDispatcher: Send + Sync {
    /// Starts one execution of `job_definition_id` in the target.
    ///
    /// `Ok(None)` means the facility accepted the call but returned no usable
    /// handle.
    async fn start_job(
        &self,
        target: &DelegationTarget,
        job_definition_id: &str,
        overrides: &[EnvironmentOverride],
    ) -> DispatchResult<Option<ExecutionHandle>>;

    /// Reads the current status of a started execution.
    async fn check_status(
        &self,
        target: &DelegationTarget,
        handle: &ExecutionHandle,
    ) -> DispatchResult<StatusObservation>;
}

#[async_trait]
impl<D> RemoteDispatcher for Arc<D>
where
    D: RemoteDispatcher + ?Sized,
{
    async fn start_job(
        &self,
        target: &DelegationTarget,
        job_definition_id: &str,
        overrides: &[EnvironmentOverride],
    ) -> DispatchResult<Option<ExecutionHandle>> {
        (**self).start_job(target, job_definition_id, overrides).await
    }

    async fn check_status(
        &self,
        target: &DelegationTarget,
        handle: &ExecutionHandle,
    ) -> DispatchResult<StatusObservation> {
        (**self).check_status(target, handle).await
    }
}

/// A remote job service, reached with a credential scoped to one target.
#[async_trait]
pub trait JobFacility: Send + Sync {
    /// Returns the facility name for logs.
    fn name(&self) -> &str;

    /// Starts a job with the given (already de-duplicated) overrides.
    async fn start(
        &self,
        credential: &ScopedCredential,
        job_definition_id: &str,
        environment: &[EnvironmentOverride],
    ) -> DispatchResult<Option<ExecutionHandle>>;

    /// Returns the raw status string of an execution.
    async fn status(
        &self,
        credential: &ScopedCredential,
        handle: &ExecutionHandle,
    ) -> DispatchResult<String>;
}

#[async_trait]
impl<F> JobFacility for Arc<F>
where
    F: JobFacility + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn start(
        &self,
        credential: &ScopedCredential,
        job_definition_id: &str,
        environment: &[EnvironmentOverride],
    ) -> DispatchResult<Option<ExecutionHandle>> {
        (**self).start(credential, job_definition_id, environment).await
    }

    async fn status(
        &self,
        credential: &ScopedCredential,
        handle: &ExecutionHandle,
    ) -> DispatchResult<String> {
        (**self).status(credential, handle).await
    }
}

/// Dispatcher that obtains a scoped credential for every call and forwards
/// it to a [`JobFacility`].
#[derive(Debug)]
pub struct BrokeredDispatcher<B, F> {
    broker: B,
    facility: F,
    credential_ttl: Duration,
    metrics: FlowMetrics,
}

impl<B, F> BrokeredDispatcher<B, F>
where
    B: CredentialBroker,
    F: JobFacility,
{
    /// Creates a dispatcher with the default credential TTL.
    #[must_use]
    pub fn new(broker: B, facility: F) -> Self {
        Self {
            broker,
            facility,
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
            metrics: FlowMetrics::new(),
        }
    }

    /// Sets the TTL requested for each credential.
    #[must_use]
    pub const fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.credential_ttl = ttl;
        self
    }

    /// Returns the credential broker.
    #[must_use]
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Returns the job facility.
    #[must_use]
    pub fn facility(&self) -> &F {
        &self.facility
    }

    async fn credential_for(&self, target: &DelegationTarget) -> DispatchResult<ScopedCredential> {
        match self.broker.assume(target, self.credential_ttl).await {
            Ok(credential) => Ok(credential),
            Err(err) => {
                warn!(error = %err, "credential delegation failed");
                Err(err.into())
            }
        }
    }

    fn record<T>(&self, operation: &str, result: &DispatchResult<T>) {
        let label = match result {
            Ok(_) => "ok".to_string(),
            Err(err) => err.class.to_string(),
        };
        self.metrics.record_dispatch(operation, &label);
    }
}

#[async_trait]
impl<B, F> RemoteDispatcher for BrokeredDispatcher<B, F>
where
    B: CredentialBroker,
    F: JobFacility,
{
    async fn start_job(
        &self,
        target: &DelegationTarget,
        job_definition_id: &str,
        overrides: &[EnvironmentOverride],
    ) -> DispatchResult<Option<ExecutionHandle>> {
        let span = dispatch_span("start_job", &target.to_string());
        let _guard = TimingGuard::new(|duration| {
            self.metrics.observe_dispatch_duration("start_job", duration);
        });
        let result = async {
            let credential = self.credential_for(target).await?;
            let environment = effective_overrides(overrides);
            for entry in &environment {
                debug!(name = %entry.name, value = %entry.display_value(), "environment override");
            }

            let handle = self
                .facility
                .start(&credential, job_definition_id, &environment)
                .await?;
            match &handle {
                Some(handle) => info!(
                    facility = self.facility.name(),
                    job = job_definition_id,
                    handle = %handle,
                    "job started"
                ),
                None => warn!(job = job_definition_id, "facility returned no execution handle"),
            }
            Ok(handle)
        }
        .instrument(span)
        .await;

        self.record("start_job", &result);
        result
    }

    async fn check_status(
        &self,
        target: &DelegationTarget,
        handle: &ExecutionHandle,
    ) -> DispatchResult<StatusObservation> {
        let span = dispatch_span("check_status", &target.to_string());
        let _guard = TimingGuard::new(|duration| {
            self.metrics.observe_dispatch_duration("check_status", duration);
        });
        let result = async {
            let credential = self.credential_for(target).await?;
            let raw = self.facility.status(&credential, handle).await?;
            let observation = StatusObservation::from_remote(raw);
            debug!(
                handle = %handle,
                status = %observation.status,
                remote_status = %observation.remote_status,
                "status observed"
            );
            Ok(observation)
        }
        .instrument(span)
        .await;

        self.record("check_status", &result);
        result
    }
}
