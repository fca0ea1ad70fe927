//! Run command - drive job requests to a terminal outcome.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use ferry_flow::fanout::{run_all, FanOutSummary};
use ferry_flow::outcome::{WorkflowOutcome, WorkflowReport};
use ferry_flow::policy::WorkflowPolicy;
use ferry_flow::request::JobRequest;
use ferry_flow::workflow::WorkflowController;

use crate::backend;
use crate::{Config, OutputFormat};

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON file holding one request object or an array of them (`-` for stdin).
    #[arg(long, short = 'r')]
    pub request: PathBuf,

    /// Override the poll interval (in seconds).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: Option<u64>,

    /// Give up after this many in-progress observations.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_polls: Option<u32>,
}

/// Execute the run command.
///
/// # Errors
///
/// Returns an error if the request file cannot be read or parsed, the
/// dispatcher cannot be built, or any workflow fails.
pub async fn execute(args: RunArgs, config: &Config) -> Result<()> {
    let payload = read_payload(&args.request)?;
    let requests = parse_requests(payload, config.region.as_deref())?;

    let mut policy = WorkflowPolicy::from_env().context("Invalid workflow policy")?;
    if let Some(secs) = args.poll_interval {
        policy = policy.with_poll_interval(std::time::Duration::from_secs(secs));
    }
    if let Some(max) = args.max_polls {
        policy = policy.with_max_polls(max);
    }

    let dispatcher = backend::dispatcher(config, &policy).await?;
    let controller = WorkflowController::new(dispatcher, policy);

    let reports = run_all(&controller, requests).await;
    let summary = FanOutSummary::from_reports(&reports);

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "reports": reports,
                    "summary": summary,
                }))
                .context("Failed to serialize reports")?
            );
        }
        OutputFormat::Text => {
            for report in &reports {
                print_report(report);
            }
            println!();
            println!("{summary}");
        }
    }

    if !summary.all_succeeded() {
        anyhow::bail!("{summary}");
    }
    Ok(())
}

fn read_payload(path: &PathBuf) -> Result<Value> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read requests from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&raw).context("Request file is not valid JSON")
}

/// Parses one request object or an array of them.
///
/// Targets without a region take `default_region`.
///
/// # Errors
///
/// Returns an error naming the offending entry if any request is malformed.
pub fn parse_requests(payload: Value, default_region: Option<&str>) -> Result<Vec<JobRequest>> {
    let entries = match payload {
        Value::Array(entries) => entries,
        single => vec![single],
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let mut request = JobRequest::from_inbound(entry)
                .with_context(|| format!("Invalid request at index {index}"))?;
            if request.delegation_target.region.is_none() {
                request.delegation_target.region = default_region.map(str::to_string);
            }
            Ok(request)
        })
        .collect()
}

fn print_report(report: &WorkflowReport<Value>) {
    match &report.outcome {
        WorkflowOutcome::Succeeded(context) => {
            println!("{}  SUCCEEDED  {context}", report.workflow_id);
        }
        WorkflowOutcome::Failed(failure) => {
            println!("{}  FAILED     {failure}", report.workflow_id);
        }
    }
    println!(
        "  starts: {}  status checks: {}  waits: {}",
        report.stats.start_attempts, report.stats.status_checks, report.stats.waits
    );
}
