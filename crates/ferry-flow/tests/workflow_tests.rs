//! End-to-end workflow controller tests against scripted and in-memory
//! dispatchers.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use ferry_flow::cancel::cancellation_pair;
use ferry_flow::credentials::{CachingBroker, StaticCredentialBroker};
use ferry_flow::dispatch::memory::{InMemoryJobFacility, ScriptedDispatcher};
use ferry_flow::dispatch::{BrokeredDispatcher, DispatchError, ErrorClass, ExecutionHandle};
use ferry_flow::outcome::{FailureCategory, FailureKind, WorkflowOutcome};
use ferry_flow::policy::WorkflowPolicy;
use ferry_flow::request::{EnvironmentOverride, JobRequest};
use ferry_flow::workflow::WorkflowController;

fn request(context: Value) -> JobRequest {
    JobRequest::new("acct-A/role-X", "proj-1", context)
        .with_override(EnvironmentOverride::plaintext("VAR1", "a"))
}

fn controller(dispatcher: ScriptedDispatcher) -> WorkflowController<ScriptedDispatcher> {
    WorkflowController::new(dispatcher, WorkflowPolicy::default())
}

#[tokio::test(start_paused = true)]
async fn immediate_success_returns_context_unchanged() {
    let context = json!({"tag": "r1", "nested": {"list": [1, {"deep": true}], "n": null}});
    let controller = controller(ScriptedDispatcher::new().with_statuses(["SUCCEEDED"]));

    let report = controller.run(request(context.clone())).await;

    assert_eq!(report.outcome, WorkflowOutcome::Succeeded(context));
    assert_eq!(report.stats.start_attempts, 1);
    assert_eq!(report.stats.status_checks, 1);
    assert_eq!(report.stats.waits, 0);
}

#[tokio::test(start_paused = true)]
async fn n_in_progress_polls_mean_n_waits_and_n_plus_one_checks() {
    for n in [0_usize, 1, 3, 7] {
        let mut statuses = vec!["IN_PROGRESS"; n];
        statuses.push("SUCCEEDED");
        let controller = controller(ScriptedDispatcher::new().with_statuses(statuses));

        let report = controller.run(request(json!({"n": n}))).await;

        assert_eq!(report.outcome, WorkflowOutcome::Succeeded(json!({"n": n})));
        assert_eq!(controller.dispatcher().status_calls(), n + 1);
        assert_eq!(report.stats.waits as usize, n);
        assert_eq!(report.stats.status_checks as usize, n + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn concrete_scenario_takes_one_wait_interval() {
    let dispatcher = ScriptedDispatcher::new()
        .with_start(Ok(ExecutionHandle::new("h1")))
        .with_statuses(["IN_PROGRESS", "SUCCEEDED"]);
    let controller = controller(dispatcher);
    let started = Instant::now();

    let report = controller.run(request(json!({"tag": "r1"}))).await;

    let elapsed = started.elapsed();
    assert_eq!(report.outcome, WorkflowOutcome::Succeeded(json!({"tag": "r1"})));
    assert_eq!(report.stats.waits, 1);
    assert!(elapsed >= Duration::from_secs(20), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(21), "{elapsed:?}");
    assert_eq!(
        controller.dispatcher().seen_overrides(),
        vec![vec![EnvironmentOverride::plaintext("VAR1", "a")]]
    );
}

#[tokio::test(start_paused = true)]
async fn two_transient_start_failures_then_success() {
    let dispatcher = ScriptedDispatcher::new()
        .with_start_error(DispatchError::transient("throttled"))
        .with_start_error(DispatchError::transient("service exception"))
        .with_statuses(["SUCCEEDED"]);
    let controller = controller(dispatcher);
    let started = Instant::now();

    let report = controller.run(request(json!({"tag": "r1"}))).await;

    assert!(report.is_success());
    assert_eq!(report.stats.start_attempts, 3);
    assert_eq!(controller.dispatcher().start_calls(), 3);
    // 2s + 4s of backoff.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(7), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn three_transient_start_failures_fail_the_workflow() {
    let dispatcher = ScriptedDispatcher::new()
        .with_start_error(DispatchError::transient("throttled"))
        .with_start_error(DispatchError::transient("throttled"))
        .with_start_error(DispatchError::transient("throttled"));
    let controller = controller(dispatcher);

    let report = controller.run(request(json!({"tag": "r1"}))).await;

    let failure = report.outcome.failure().expect("workflow should fail");
    assert_eq!(failure.kind, FailureKind::DispatchStartFailure);
    assert_eq!(failure.reason, "dispatch start failure");
    assert_eq!(failure.category, FailureCategory::Dispatch);
    assert_eq!(failure.error_class, Some(ErrorClass::Transient));
    assert_eq!(report.stats.start_attempts, 3);
    assert_eq!(controller.dispatcher().status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn permanent_start_failure_is_not_retried() {
    let dispatcher = ScriptedDispatcher::new()
        .with_start_error(DispatchError::permanent("project proj-1 not found"));
    let controller = controller(dispatcher);
    let started = Instant::now();

    let report = controller.run(request(json!({"tag": "r1"}))).await;

    let failure = report.outcome.failure().expect("workflow should fail");
    assert_eq!(failure.kind, FailureKind::DispatchStartFailure);
    assert_eq!(failure.error_class, Some(ErrorClass::Permanent));
    assert_eq!(report.stats.start_attempts, 1);
    assert_eq!(controller.dispatcher().start_calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn status_check_exhaustion_reports_status_check_failure() {
    let dispatcher = ScriptedDispatcher::new()
        .with_statuses(["IN_PROGRESS"])
        .with_status_error(DispatchError::transient("timeout"))
        .with_status_error(DispatchError::transient("timeout"))
        .with_status_error(DispatchError::transient("timeout"));
    let controller = controller(dispatcher);

    let report = controller.run(request(json!({}))).await;

    let failure = report.outcome.failure().expect("workflow should fail");
    assert_eq!(failure.kind, FailureKind::StatusCheckFailure);
    assert_eq!(failure.reason, "status check failure");
    assert_eq!(failure.last_status.as_deref(), Some("IN_PROGRESS"));
    assert_eq!(report.stats.status_checks, 4);
}

#[tokio::test(start_paused = true)]
async fn unrecognized_status_fails_the_workflow() {
    let dispatcher = ScriptedDispatcher::new().with_statuses(["IN_PROGRESS", "PAUSED"]);
    let controller = controller(dispatcher);

    let report = controller.run(request(json!({"tag": "r1"}))).await;

    let failure = report.outcome.failure().expect("workflow should fail");
    assert_eq!(failure.kind, FailureKind::UnrecognizedStatus);
    assert_eq!(failure.category, FailureCategory::UnrecognizedStatus);
    assert_eq!(failure.last_status.as_deref(), Some("PAUSED"));
    assert!(failure.reason.contains("PAUSED"));
    assert_eq!(controller.dispatcher().status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn job_failure_reason_is_the_observed_status() {
    for status in ["FAILED", "TIMED_OUT", "STOPPED"] {
        let controller = controller(ScriptedDispatcher::new().with_statuses([status]));

        let report = controller.run(request(json!({}))).await;

        let failure = report.outcome.failure().expect("workflow should fail");
        assert_eq!(failure.kind, FailureKind::JobFailed);
        assert_eq!(failure.category, FailureCategory::JobLogic);
        assert_eq!(failure.reason, status);
    }
}

#[tokio::test(start_paused = true)]
async fn secret_values_never_reach_failure_payload() {
    let secret = "s3cr3t-p@ss";
    let dispatcher = ScriptedDispatcher::new().with_start_error(DispatchError::permanent(format!(
        "invalid value '{secret}' for DB_PASSWORD"
    )));
    let controller = controller(dispatcher);
    let request = JobRequest::new("acct-A/role-X", "proj-1", json!({"tag": "r1"}))
        .with_override(EnvironmentOverride::plaintext("VAR1", "a"))
        .with_override(EnvironmentOverride::secret("DB_PASSWORD", secret));

    let report = controller.run(request).await;

    let failure = report.outcome.failure().expect("workflow should fail");
    let payload = serde_json::to_string(failure).unwrap();
    assert!(!payload.contains(secret), "{payload}");
    assert!(!failure.to_string().contains(secret));
    assert!(!serde_json::to_string(&report).unwrap().contains(secret));
    assert!(payload.contains("DB_PASSWORD"));
}

#[tokio::test(start_paused = true)]
async fn secret_values_scrubbed_from_unrecognized_status() {
    let secret = "tok-123456";
    let dispatcher = ScriptedDispatcher::new().with_statuses([format!("WEIRD:{secret}")]);
    let controller = controller(dispatcher);
    let request = JobRequest::new("acct-A/role-X", "proj-1", json!({}))
        .with_override(EnvironmentOverride::secret("TOKEN", secret));

    let report = controller.run(request).await;

    let payload = serde_json::to_string(&report.outcome).unwrap();
    assert!(!payload.contains(secret), "{payload}");
}

#[tokio::test(start_paused = true)]
async fn poll_ceiling_stops_a_stuck_job() {
    let dispatcher = ScriptedDispatcher::new().with_statuses(["IN_PROGRESS"; 10]);
    let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default().with_max_polls(2));

    let report = controller.run(request(json!({}))).await;

    let failure = report.outcome.failure().expect("workflow should fail");
    assert_eq!(failure.kind, FailureKind::PollLimitExceeded);
    assert_eq!(failure.category, FailureCategory::Operator);
    assert_eq!(report.stats.waits, 2);
    assert_eq!(report.stats.status_checks, 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_wait_fails_the_workflow() {
    let dispatcher = ScriptedDispatcher::new().with_statuses(["IN_PROGRESS"; 100]);
    let controller = controller(dispatcher);
    let (handle, token) = cancellation_pair();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(50)).await;
        handle.cancel();
    });
    let report = controller
        .run_until_cancelled(request(json!({"tag": "r1"})), &token)
        .await;
    canceller.await.unwrap();

    let failure = report.outcome.failure().expect("workflow should fail");
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert!(failure.reason.contains("waiting"));
    assert_eq!(report.stats.waits, 2);
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_never_dispatches() {
    let controller = controller(ScriptedDispatcher::new());
    let (handle, token) = cancellation_pair();
    handle.cancel();

    let report = controller.run_until_cancelled(request(json!({})), &token).await;

    assert_eq!(
        report.outcome.failure().map(|f| f.kind),
        Some(FailureKind::Cancelled)
    );
    assert_eq!(controller.dispatcher().start_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn delegation_denial_is_reported_as_delegation() {
    let broker = StaticCredentialBroker::new().deny("acct-A/role-X");
    let dispatcher = BrokeredDispatcher::new(broker, InMemoryJobFacility::new("test"));
    let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default());

    let report = controller.run(request(json!({"tag": "r1"}))).await;

    let failure = report.outcome.failure().expect("workflow should fail");
    assert_eq!(failure.kind, FailureKind::DispatchStartFailure);
    assert_eq!(failure.category, FailureCategory::Delegation);
    assert_eq!(report.stats.start_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn delegation_outage_is_retried() {
    let broker = Arc::new(StaticCredentialBroker::new());
    broker.fail_next_unavailable(2);
    let facility = InMemoryJobFacility::new("test")
        .with_status_script("proj-1", ["IN_PROGRESS", "SUCCEEDED"]);
    let dispatcher = BrokeredDispatcher::new(CachingBroker::new(broker.clone()), facility);
    let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default());

    let report = controller.run(request(json!({"tag": "r1"}))).await;

    assert_eq!(report.outcome, WorkflowOutcome::Succeeded(json!({"tag": "r1"})));
    assert_eq!(report.stats.start_attempts, 3);
    // Two outages, one issued credential reused for both status checks.
    assert_eq!(broker.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn merged_environment_reaches_the_remote_job() {
    let facility = InMemoryJobFacility::new("test").with_job_definition(
        "proj-1",
        vec![
            EnvironmentOverride::plaintext("VAR1", "default"),
            EnvironmentOverride::plaintext("STAGE", "dev"),
        ],
    );
    let dispatcher = BrokeredDispatcher::new(StaticCredentialBroker::new(), facility);
    let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default());

    let request = JobRequest::new("acct-A/role-X", "proj-1", json!({}))
        .with_override(EnvironmentOverride::plaintext("VAR1", "a"))
        .with_override(EnvironmentOverride::plaintext("NEW", "1"))
        .with_override(EnvironmentOverride::plaintext("VAR1", "b"));
    let report = controller.run(request).await;
    assert!(report.is_success());

    let started = controller.dispatcher().facility().started_jobs().unwrap();
    assert_eq!(
        started[0].environment,
        vec![
            EnvironmentOverride::plaintext("VAR1", "b"),
            EnvironmentOverride::plaintext("STAGE", "dev"),
            EnvironmentOverride::plaintext("NEW", "1"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn inbound_payload_round_trips_through_a_run() {
    let payload = json!({
        "delegationTarget": {"role": "acct-A/role-X", "region": "eu-west-1"},
        "jobDefinitionId": "proj-1",
        "environmentOverrides": [{"name": "VAR1", "value": "a", "sensitivity": "PLAINTEXT"}],
        "tag": "r1",
        "pipeline": {"stage": "deploy", "attempt": 2}
    });
    let request = JobRequest::from_inbound(payload).unwrap();
    let controller = controller(ScriptedDispatcher::new().with_statuses(["SUCCEEDED"]));

    let report = controller.run(request).await;

    assert_eq!(
        serde_json::to_value(&report.outcome).unwrap(),
        json!({"tag": "r1", "pipeline": {"stage": "deploy", "attempt": 2}})
    );
}
