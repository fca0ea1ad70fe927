//! Observability metrics for cross-account orchestration.
//!
//! Metrics are emitted through the `metrics` crate facade; without an
//! installed recorder every call is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `ferry_flow_workflows_total` | Counter | `outcome`, `category` | Terminal workflow outcomes |
//! | `ferry_flow_transitions_total` | Counter | `from_state`, `to_state` | Workflow phase transitions |
//! | `ferry_flow_dispatch_calls_total` | Counter | `operation`, `result` | Dispatcher calls |
//! | `ferry_flow_retries_total` | Counter | `operation`, `attempt` | Retried dispatcher calls |
//! | `ferry_flow_status_polls_total` | Counter | `status` | Status observations |
//! | `ferry_flow_workflow_duration_seconds` | Histogram | `outcome` | End-to-end workflow time |
//! | `ferry_flow_dispatch_duration_seconds` | Histogram | `operation` | Dispatcher call latency |
//! | `ferry_flow_credential_requests_total` | Counter | `result` | Credential broker requests |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ferry_flow::metrics::FlowMetrics;
//!
//! let metrics = FlowMetrics::new();
//! metrics.record_transition("polling", "waiting");
//! metrics.record_dispatch("start_job", "ok");
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Terminal workflow outcomes.
    pub const WORKFLOWS_TOTAL: &str = "ferry_flow_workflows_total";
    /// Counter: Workflow phase transitions.
    pub const TRANSITIONS_TOTAL: &str = "ferry_flow_transitions_total";
    /// Counter: Dispatcher calls by operation and result.
    pub const DISPATCH_CALLS_TOTAL: &str = "ferry_flow_dispatch_calls_total";
    /// Counter: Retried dispatcher calls.
    pub const RETRIES_TOTAL: &str = "ferry_flow_retries_total";
    /// Counter: Status observations by normalized status.
    pub const STATUS_POLLS_TOTAL: &str = "ferry_flow_status_polls_total";
    /// Histogram: End-to-end workflow duration in seconds.
    pub const WORKFLOW_DURATION_SECONDS: &str = "ferry_flow_workflow_duration_seconds";
    /// Histogram: Dispatcher call latency in seconds.
    pub const DISPATCH_DURATION_SECONDS: &str = "ferry_flow_dispatch_duration_seconds";
    /// Counter: Credential broker requests by result.
    pub const CREDENTIAL_REQUESTS_TOTAL: &str = "ferry_flow_credential_requests_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Terminal outcome (succeeded, failed).
    pub const OUTCOME: &str = "outcome";
    /// Failure category (delegation, dispatch, job_logic, ...).
    pub const CATEGORY: &str = "category";
    /// Previous phase (for transitions).
    pub const FROM_STATE: &str = "from_state";
    /// Target phase (for transitions).
    pub const TO_STATE: &str = "to_state";
    /// Dispatcher operation (`start_job`, `check_status`).
    pub const OPERATION: &str = "operation";
    /// Result (ok, transient, permanent, issued, cached, error).
    pub const RESULT: &str = "result";
    /// Normalized execution status.
    pub const STATUS: &str = "status";
    /// Attempt number that failed and is being retried.
    pub const ATTEMPT: &str = "attempt";
}

/// High-level interface for recording orchestration metrics.
///
/// Cheap to clone and share across workflows.
#[derive(Debug, Clone, Default)]
pub struct FlowMetrics {
    _private: (),
}

impl FlowMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a terminal workflow outcome.
    pub fn record_workflow(&self, outcome: &str, category: &str) {
        counter!(
            names::WORKFLOWS_TOTAL,
            labels::OUTCOME => outcome.to_string(),
            labels::CATEGORY => category.to_string(),
        )
        .increment(1);
    }

    /// Records a workflow phase transition.
    pub fn record_transition(&self, from_state: &str, to_state: &str) {
        counter!(
            names::TRANSITIONS_TOTAL,
            labels::FROM_STATE => from_state.to_string(),
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Records a dispatcher call.
    pub fn record_dispatch(&self, operation: &str, result: &str) {
        counter!(
            names::DISPATCH_CALLS_TOTAL,
            labels::OPERATION => operation.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records a retry after a transient failure of `attempt`.
    pub fn record_retry(&self, operation: &str, attempt: u32) {
        counter!(
            names::RETRIES_TOTAL,
            labels::OPERATION => operation.to_string(),
            labels::ATTEMPT => attempt.to_string(),
        )
        .increment(1);
    }

    /// Records one status observation.
    pub fn record_status_poll(&self, status: &str) {
        counter!(
            names::STATUS_POLLS_TOTAL,
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Records end-to-end workflow duration.
    pub fn observe_workflow_duration(&self, outcome: &str, duration: Duration) {
        histogram!(
            names::WORKFLOW_DURATION_SECONDS,
            labels::OUTCOME => outcome.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records the latency of one dispatcher call.
    pub fn observe_dispatch_duration(&self, operation: &str, duration: Duration) {
        histogram!(
            names::DISPATCH_DURATION_SECONDS,
            labels::OPERATION => operation.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records a credential broker request.
    pub fn record_credential_request(&self, result: &str) {
        counter!(
            names::CREDENTIAL_REQUESTS_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust,no_run
/// use ferry_flow::metrics::{FlowMetrics, TimingGuard};
///
/// let metrics = FlowMetrics::new();
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_dispatch_duration("start_job", duration);
///     });
///
///     // Call the dispatcher...
/// }
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_metrics_record_without_recorder() {
        let metrics = FlowMetrics::new();

        metrics.record_transition("starting", "started");
        metrics.record_dispatch("start_job", "ok");
        metrics.record_retry("check_status", 1);
        metrics.record_status_poll("in_progress");
        metrics.record_workflow("failed", "dispatch");
        metrics.record_credential_request("issued");
        metrics.observe_workflow_duration("succeeded", Duration::from_millis(250));
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(10)));
    }

    #[test]
    fn timing_guard_elapsed_works() {
        let guard = TimingGuard::new(|_| {});
        std::thread::sleep(Duration::from_millis(5));
        assert!(guard.elapsed() >= Duration::from_millis(5));
    }
}
