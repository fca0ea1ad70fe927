//! Workflow controller.
//!
//! Drives one job request through its lifecycle:
//!
//! ```text
//! INIT -> STARTING -> STARTED -> POLLING -> WAITING -> POLLING -> ... -> SUCCEEDED
//!                                                                    \-> FAILED
//! ```
//!
//! Transient dispatcher errors are retried with exponential backoff up to
//! the policy's attempt limit; permanent errors fail the run immediately.
//! While the job is in progress the controller waits the poll interval and
//! checks again. A run never returns an error: every failure becomes a
//! [`FailureReport`] in the terminal [`WorkflowOutcome`].

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Instrument};

use ferry_core::observability::workflow_span;
use ferry_core::{scrub_secrets, WorkflowId};

use crate::cancel::CancellationToken;
use crate::dispatch::{
    DispatchError, DispatchResult, ExecutionHandle, ExecutionStatus, RemoteDispatcher,
    StatusObservation,
};
use crate::error::{Error, Result};
use crate::metrics::FlowMetrics;
use crate::outcome::{
    ErrorInfo, FailureKind, FailureReport, WorkflowOutcome, WorkflowReport, WorkflowStats,
};
use crate::policy::WorkflowPolicy;
use crate::request::JobRequest;

/// Lifecycle phase of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowPhase {
    /// Request received, not yet validated.
    Init,
    /// Starting the remote job.
    Starting,
    /// Remote job started; handle recorded.
    Started,
    /// Checking the remote job's status.
    Polling,
    /// Waiting the poll interval before checking again.
    Waiting,
    /// The remote job succeeded.
    Succeeded,
    /// The workflow failed.
    Failed,
}

impl WorkflowPhase {
    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the phase may move to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Starting | Self::Failed)
                | (Self::Starting, Self::Started | Self::Failed)
                | (Self::Started, Self::Polling)
                | (Self::Polling, Self::Waiting | Self::Succeeded | Self::Failed)
                | (Self::Waiting, Self::Polling | Self::Failed)
        )
    }

    /// Returns the lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Polling => "polling",
            Self::Waiting => "waiting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Mutable state of one workflow run.
#[derive(Debug)]
pub struct WorkflowState<C> {
    /// Identifier of the run.
    pub workflow_id: WorkflowId,
    /// The request; never modified.
    pub request: JobRequest<C>,
    /// Handle of the started job.
    pub handle: Option<ExecutionHandle>,
    /// Last status observation.
    pub status: Option<StatusObservation>,
    /// Last dispatcher error, scrubbed.
    pub last_error: Option<ErrorInfo>,
    /// Current phase.
    pub phase: WorkflowPhase,
    /// Call and wait counters.
    pub stats: WorkflowStats,
    failure: Option<FailureReport>,
    metrics: FlowMetrics,
}

impl<C> WorkflowState<C> {
    /// Creates the state for a new run in [`WorkflowPhase::Init`].
    #[must_use]
    pub fn new(request: JobRequest<C>) -> Self {
        Self {
            workflow_id: WorkflowId::generate(),
            request,
            handle: None,
            status: None,
            last_error: None,
            phase: WorkflowPhase::Init,
            stats: WorkflowStats::default(),
            failure: None,
            metrics: FlowMetrics::new(),
        }
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if the move is not allowed
    /// from the current phase.
    pub fn transition(&mut self, next: WorkflowPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.phase, to = %next, "workflow transition");
        self.metrics
            .record_transition(self.phase.as_label(), next.as_label());
        self.phase = next;
        Ok(())
    }

    /// Moves to [`WorkflowPhase::Failed`] and records the report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if the current phase cannot
    /// fail.
    pub fn fail(&mut self, report: FailureReport) -> Result<()> {
        self.transition(WorkflowPhase::Failed)?;
        self.failure = Some(report);
        Ok(())
    }

    /// Returns the failure report, once failed.
    #[must_use]
    pub fn failure(&self) -> Option<&FailureReport> {
        self.failure.as_ref()
    }

    fn force_fail(&mut self, report: FailureReport) {
        self.phase = WorkflowPhase::Failed;
        self.failure = Some(report);
    }

    /// Consumes the state, producing the invoker-facing report.
    #[must_use]
    pub fn into_report(self) -> WorkflowReport<C> {
        let outcome = if self.phase == WorkflowPhase::Succeeded {
            WorkflowOutcome::Succeeded(self.request.original_context)
        } else {
            let phase = self.phase;
            WorkflowOutcome::Failed(self.failure.unwrap_or_else(|| {
                FailureReport::new(FailureKind::ContractViolation)
                    .with_reason(&format!("workflow stopped in phase {phase}"), &[])
            }))
        };
        WorkflowReport {
            workflow_id: self.workflow_id,
            outcome,
            stats: self.stats,
        }
    }
}

enum CallFailure {
    Dispatch(DispatchError),
    Cancelled,
}

/// Runs job requests against a [`RemoteDispatcher`] under a
/// [`WorkflowPolicy`].
///
/// One controller can drive any number of concurrent runs; each run owns
/// its own [`WorkflowState`].
#[derive(Debug)]
pub struct WorkflowController<D> {
    dispatcher: D,
    policy: WorkflowPolicy,
    metrics: FlowMetrics,
}

impl<D: RemoteDispatcher> WorkflowController<D> {
    /// Creates a controller.
    #[must_use]
    pub fn new(dispatcher: D, policy: WorkflowPolicy) -> Self {
        Self {
            dispatcher,
            policy,
            metrics: FlowMetrics::new(),
        }
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Runs a request to a terminal outcome.
    pub async fn run<C>(&self, request: JobRequest<C>) -> WorkflowReport<C> {
        self.run_until_cancelled(request, &CancellationToken::never())
            .await
    }

    /// Runs a request to a terminal outcome, stopping early if `cancel`
    /// fires during a dispatcher call or a wait.
    pub async fn run_until_cancelled<C>(
        &self,
        request: JobRequest<C>,
        cancel: &CancellationToken,
    ) -> WorkflowReport<C> {
        let mut state = WorkflowState::new(request);
        let span = workflow_span(
            &state.workflow_id.to_string(),
            &state.request.delegation_target.to_string(),
            &state.request.job_definition_id,
        );
        let started = Instant::now();

        let driven = self.drive(&mut state, cancel).instrument(span.clone()).await;

        span.in_scope(|| {
            if let Err(err) = driven {
                error!(error = %err, "workflow aborted on invalid transition");
                state.force_fail(
                    FailureReport::new(FailureKind::ContractViolation)
                        .with_reason(&err.to_string(), &[]),
                );
            }
            self.finish(&state, started.elapsed());
        });
        state.into_report()
    }

    fn finish<C>(&self, state: &WorkflowState<C>, elapsed: Duration) {
        let stats = state.stats;
        match state.failure() {
            None => {
                info!(
                    start_attempts = stats.start_attempts,
                    status_checks = stats.status_checks,
                    waits = stats.waits,
                    "workflow succeeded"
                );
                self.metrics.record_workflow("succeeded", "none");
                self.metrics.observe_workflow_duration("succeeded", elapsed);
            }
            Some(report) => {
                warn!(
                    kind = %report.kind,
                    category = %report.category,
                    reason = %report.reason,
                    start_attempts = stats.start_attempts,
                    status_checks = stats.status_checks,
                    waits = stats.waits,
                    "workflow failed"
                );
                self.metrics
                    .record_workflow("failed", report.category.as_label());
                self.metrics.observe_workflow_duration("failed", elapsed);
            }
        }
    }

    async fn drive<C>(&self, state: &mut WorkflowState<C>, cancel: &CancellationToken) -> Result<()> {
        let owned_secrets: Vec<String> = state
            .request
            .secret_values()
            .into_iter()
            .map(ToOwned::to_owned)
            .collect();
        let secrets: Vec<&str> = owned_secrets.iter().map(String::as_str).collect();

        loop {
            match state.phase {
                WorkflowPhase::Init => match state.request.validate() {
                    Ok(()) => state.transition(WorkflowPhase::Starting)?,
                    Err(err) => state.fail(
                        FailureReport::new(FailureKind::InvalidRequest)
                            .with_reason(&err.to_string(), &secrets),
                    )?,
                },

                WorkflowPhase::Starting => {
                    let target = &state.request.delegation_target;
                    let job = state.request.job_definition_id.as_str();
                    let overrides = state.request.environment_overrides.as_slice();
                    let result = self
                        .call_with_retry(
                            "start_job",
                            &mut state.stats.start_attempts,
                            cancel,
                            &secrets,
                            move || self.dispatcher.start_job(target, job, overrides),
                        )
                        .await;

                    match result {
                        Ok(Some(handle)) => {
                            state.handle = Some(handle);
                            state.transition(WorkflowPhase::Started)?;
                        }
                        Ok(None) => state.fail(
                            FailureReport::new(FailureKind::ContractViolation).with_reason(
                                "dispatcher returned no execution handle",
                                &secrets,
                            ),
                        )?,
                        Err(failure) => {
                            self.fail_call(state, FailureKind::DispatchStartFailure, failure, &secrets)?;
                        }
                    }
                }

                WorkflowPhase::Started => {
                    if let Some(handle) = &state.handle {
                        info!(handle = %handle, "remote job started");
                    }
                    state.transition(WorkflowPhase::Polling)?;
                }

                WorkflowPhase::Polling => {
                    let Some(handle) = state.handle.clone() else {
                        state.fail(
                            FailureReport::new(FailureKind::ContractViolation)
                                .with_reason("polling without an execution handle", &secrets),
                        )?;
                        continue;
                    };
                    let target = &state.request.delegation_target;
                    let handle = &handle;
                    let result = self
                        .call_with_retry(
                            "check_status",
                            &mut state.stats.status_checks,
                            cancel,
                            &secrets,
                            move || self.dispatcher.check_status(target, handle),
                        )
                        .await;

                    match result {
                        Ok(observation) => self.observe(state, observation, &secrets)?,
                        Err(failure) => {
                            self.fail_call(state, FailureKind::StatusCheckFailure, failure, &secrets)?;
                        }
                    }
                }

                WorkflowPhase::Waiting => {
                    if sleep_or_cancel(self.policy.poll_interval, cancel).await {
                        state.stats.waits += 1;
                        state.transition(WorkflowPhase::Polling)?;
                    } else {
                        state.fail(cancelled_report(WorkflowPhase::Waiting))?;
                    }
                }

                WorkflowPhase::Succeeded | WorkflowPhase::Failed => return Ok(()),
            }
        }
    }

    fn observe<C>(
        &self,
        state: &mut WorkflowState<C>,
        observation: StatusObservation,
        secrets: &[&str],
    ) -> Result<()> {
        self.metrics.record_status_poll(observation.status.as_label());
        let status = observation.status;
        let recognized = observation.recognized;
        let raw = observation.remote_status.clone();
        state.status = Some(observation);

        match status {
            ExecutionStatus::Succeeded => state.transition(WorkflowPhase::Succeeded),
            ExecutionStatus::InProgress => match self.policy.max_polls {
                Some(max) if state.stats.waits >= max => state.fail(
                    FailureReport::new(FailureKind::PollLimitExceeded)
                        .with_reason(&format!("job still in progress after {max} polls"), secrets)
                        .with_last_status(&raw, secrets),
                ),
                _ => state.transition(WorkflowPhase::Waiting),
            },
            ExecutionStatus::Failed => state.fail(
                FailureReport::new(FailureKind::JobFailed)
                    .with_reason(&raw, secrets)
                    .with_last_status(&raw, secrets),
            ),
            ExecutionStatus::Faulted if !recognized => state.fail(
                FailureReport::new(FailureKind::UnrecognizedStatus)
                    .with_reason(&format!("unrecognized status '{raw}'"), secrets)
                    .with_last_status(&raw, secrets),
            ),
            ExecutionStatus::Faulted => state.fail(
                FailureReport::new(FailureKind::JobFaulted)
                    .with_reason(&raw, secrets)
                    .with_last_status(&raw, secrets),
            ),
        }
    }

    fn fail_call<C>(
        &self,
        state: &mut WorkflowState<C>,
        kind: FailureKind,
        failure: CallFailure,
        secrets: &[&str],
    ) -> Result<()> {
        match failure {
            CallFailure::Cancelled => state.fail(cancelled_report(state.phase)),
            CallFailure::Dispatch(err) => {
                state.last_error = Some(ErrorInfo::scrubbed(&err, secrets));
                let mut report = FailureReport::from_dispatch_error(kind, &err, secrets);
                if let Some(observation) = &state.status {
                    report = report.with_last_status(&observation.remote_status, secrets);
                }
                state.fail(report)
            }
        }
    }

    async fn call_with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        attempts: &mut u32,
        cancel: &CancellationToken,
        secrets: &[&str],
        mut call: F,
    ) -> std::result::Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DispatchResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            *attempts += 1;

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CallFailure::Cancelled),
                result = call() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %scrub_secrets(&err.to_string(), secrets),
                        "transient dispatcher error; retrying"
                    );
                    self.metrics.record_retry(operation, attempt);
                    if !sleep_or_cancel(delay, cancel).await {
                        return Err(CallFailure::Cancelled);
                    }
                }
                Err(err) => {
                    warn!(
                        operation,
                        attempt,
                        class = %err.class,
                        error = %scrub_secrets(&err.to_string(), secrets),
                        "dispatcher call failed"
                    );
                    return Err(CallFailure::Dispatch(err));
                }
            }
        }
    }
}

fn cancelled_report(phase: WorkflowPhase) -> FailureReport {
    FailureReport::new(FailureKind::Cancelled)
        .with_reason(&format!("cancelled while {phase}"), &[])
}

/// Sleeps for `delay`; returns false if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::memory::ScriptedDispatcher;
    use serde_json::json;

    #[test]
    fn allowed_transitions() {
        use WorkflowPhase::*;
        assert!(Init.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Started));
        assert!(Started.can_transition_to(Polling));
        assert!(Polling.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Polling));
        assert!(Polling.can_transition_to(Succeeded));
        assert!(Polling.can_transition_to(Failed));

        assert!(!Init.can_transition_to(Polling));
        assert!(!Started.can_transition_to(Succeeded));
        assert!(!Waiting.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Starting));
    }

    #[test]
    fn terminal_phases() {
        assert!(WorkflowPhase::Succeeded.is_terminal());
        assert!(WorkflowPhase::Failed.is_terminal());
        assert!(!WorkflowPhase::Waiting.is_terminal());
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut state = WorkflowState::new(JobRequest::new("acct-A/role-X", "proj-1", ()));
        let err = state.transition(WorkflowPhase::Succeeded).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(state.phase, WorkflowPhase::Init);
    }

    #[test]
    fn report_from_unfinished_state_is_failure() {
        let state = WorkflowState::new(JobRequest::new("acct-A/role-X", "proj-1", ()));
        let report = state.into_report();
        let failure = report.outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::ContractViolation);
        assert!(failure.reason.contains("init"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_request_fails_without_dispatch() {
        let dispatcher = ScriptedDispatcher::new();
        let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default());

        let report = controller
            .run(JobRequest::new("acct-A/role-X", "", json!({"tag": "r1"})))
            .await;

        let failure = report.outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::InvalidRequest);
        assert_eq!(controller.dispatcher().start_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_handle_is_contract_violation() {
        let dispatcher = ScriptedDispatcher::new().with_start(Ok(None));
        let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default());

        let report = controller
            .run(JobRequest::new("acct-A/role-X", "proj-1", ()))
            .await;

        let failure = report.outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::ContractViolation);
        assert_eq!(report.stats.start_attempts, 1);
        assert_eq!(controller.dispatcher().status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_retry_then_success() {
        let dispatcher = ScriptedDispatcher::new()
            .with_status_error(DispatchError::transient("throttled"))
            .with_statuses(["SUCCEEDED"]);
        let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default());

        let report = controller
            .run(JobRequest::new("acct-A/role-X", "proj-1", 7_u32))
            .await;

        assert_eq!(report.outcome, WorkflowOutcome::Succeeded(7));
        assert_eq!(report.stats.status_checks, 2);
        assert_eq!(report.stats.waits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn faulted_status_is_dispatch_category() {
        let dispatcher = ScriptedDispatcher::new().with_statuses(["FAULT"]);
        let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default());

        let report = controller
            .run(JobRequest::new("acct-A/role-X", "proj-1", ()))
            .await;

        let failure = report.outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::JobFaulted);
        assert_eq!(failure.last_status.as_deref(), Some("FAULT"));
    }
}
