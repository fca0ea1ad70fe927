//! Running many workflows at once.
//!
//! Every run is independent: one run failing never affects another, and
//! the reports come back in request order.

use std::collections::BTreeMap;
use std::fmt;

use futures::future::join_all;
use serde::Serialize;

use crate::dispatch::RemoteDispatcher;
use crate::outcome::{FailureCategory, WorkflowReport};
use crate::request::JobRequest;
use crate::workflow::WorkflowController;

/// Runs every request concurrently and returns the reports in order.
pub async fn run_all<D, C>(
    controller: &WorkflowController<D>,
    requests: Vec<JobRequest<C>>,
) -> Vec<WorkflowReport<C>>
where
    D: RemoteDispatcher,
{
    join_all(requests.into_iter().map(|request| controller.run(request))).await
}

/// Aggregate view of a batch of reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutSummary {
    /// Number of runs.
    pub total: usize,
    /// Runs that succeeded.
    pub succeeded: usize,
    /// Runs that failed.
    pub failed: usize,
    /// Failed runs per category.
    pub by_category: BTreeMap<FailureCategory, usize>,
}

impl FanOutSummary {
    /// Summarizes a batch of reports.
    #[must_use]
    pub fn from_reports<C>(reports: &[WorkflowReport<C>]) -> Self {
        let mut summary = Self {
            total: reports.len(),
            ..Self::default()
        };
        for report in reports {
            match report.outcome.failure() {
                None => summary.succeeded += 1,
                Some(failure) => {
                    summary.failed += 1;
                    *summary.by_category.entry(failure.category).or_insert(0) += 1;
                }
            }
        }
        summary
    }

    /// Returns true if every run succeeded.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for FanOutSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} workflows succeeded", self.succeeded, self.total)?;
        if !self.by_category.is_empty() {
            let parts: Vec<String> = self
                .by_category
                .iter()
                .map(|(category, count)| format!("{category}: {count}"))
                .collect();
            write!(f, " (failed: {})", parts.join(", "))?;
        }
        Ok(())
    }
}
