//! Status command - read the status of a started job.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};

use ferry_flow::dispatch::StatusObservation;
use ferry_flow::policy::WorkflowPolicy;
use ferry_flow::proxy::{
    handle_event, FIELD_INVOCATION_TYPE, FIELD_JOB_ID, FIELD_JOB_STATUS, FIELD_REGION,
    FIELD_ROLE_ARN,
};

use crate::backend;
use crate::{Config, OutputFormat};

/// Arguments for the status command.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Role the job was started under.
    #[arg(long)]
    pub role: String,

    /// Execution handle returned by `ferry start`.
    #[arg(long)]
    pub job_id: String,
}

/// Execute the status command.
///
/// In `--simulate` mode jobs live only as long as the process, so a handle
/// from an earlier invocation is reported as not found.
///
/// # Errors
///
/// Returns an error if the dispatcher cannot be built or the status check
/// fails.
pub async fn execute(args: StatusArgs, config: &Config) -> Result<()> {
    let policy = WorkflowPolicy::from_env().context("Invalid workflow policy")?;
    let dispatcher = backend::dispatcher(config, &policy).await?;

    let mut event = json!({
        FIELD_INVOCATION_TYPE: "CHECK_STATUS",
        FIELD_ROLE_ARN: args.role,
        FIELD_JOB_ID: args.job_id,
    });
    if let Some(region) = &config.region {
        event[FIELD_REGION] = Value::from(region.as_str());
    }

    let output = handle_event(dispatcher.as_ref(), event)
        .await
        .context("Failed to check job status")?;
    let remote_status = output[FIELD_JOB_STATUS].as_str().unwrap_or_default();
    let observation = StatusObservation::from_remote(remote_status);

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "jobId": args.job_id,
                    "remoteStatus": observation.remote_status,
                    "status": observation.status.as_label(),
                    "terminal": observation.status.is_terminal(),
                    "recognized": observation.recognized,
                }))
                .context("Failed to serialize response")?
            );
        }
        OutputFormat::Text => {
            println!("Job: {}", args.job_id);
            println!();
            println!("  Status:   {}", observation.status);
            println!("  Remote:   {}", observation.remote_status);
            if !observation.recognized {
                println!("  Warning:  status not recognized");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: StatusArgs,
        }

        let cli = TestCli::parse_from(["test", "--role", "acct-A/role-X", "--job-id", "proj-1:1"]);
        assert_eq!(cli.args.role, "acct-A/role-X");
        assert_eq!(cli.args.job_id, "proj-1:1");
    }

    #[tokio::test]
    async fn simulated_status_of_unknown_job_fails() {
        let config = Config {
            simulate: true,
            ..Config::default()
        };
        let args = StatusArgs {
            role: "acct-A/role-X".to_string(),
            job_id: "proj-1:00000001".to_string(),
        };

        let err = execute(args, &config).await.expect_err("job was never started");
        assert!(format!("{err:#}").contains("not found"));
    }
}
