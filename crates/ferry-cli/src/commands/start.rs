//! Start command - start one remote job without waiting for it.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};

use ferry_core::REDACTED;
use ferry_flow::policy::WorkflowPolicy;
use ferry_flow::proxy::{
    handle_event, FIELD_ENVIRONMENT, FIELD_INVOCATION_TYPE, FIELD_JOB_HANDLE, FIELD_JOB_STATUS,
    FIELD_PROJECT, FIELD_REGION, FIELD_ROLE_ARN,
};
use ferry_flow::request::EnvironmentOverride;

use crate::backend;
use crate::{Config, OutputFormat};

/// Arguments for the start command.
#[derive(Debug, Args)]
pub struct StartArgs {
    /// Role to delegate to in the remote account.
    #[arg(long)]
    pub role: String,

    /// Job definition to start.
    #[arg(long)]
    pub project: String,

    /// Plaintext environment override (NAME=VALUE, repeatable).
    #[arg(long = "env", short = 'e', value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Secret environment override (NAME=VALUE, repeatable). Never printed.
    #[arg(long = "secret-env", value_parser = parse_env_pair)]
    pub secret_env: Vec<(String, String)>,
}

impl StartArgs {
    /// Returns the overrides in flag order, plaintext first.
    #[must_use]
    pub fn overrides(&self) -> Vec<EnvironmentOverride> {
        self.env
            .iter()
            .map(|(name, value)| EnvironmentOverride::plaintext(name, value))
            .chain(
                self.secret_env
                    .iter()
                    .map(|(name, value)| EnvironmentOverride::secret(name, value)),
            )
            .collect()
    }
}

/// Parses a `NAME=VALUE` pair.
///
/// # Errors
///
/// Returns an error if there is no `=` or the name is empty.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        Some(_) => Err("environment override name must not be empty".to_string()),
        None => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

/// Execute the start command.
///
/// # Errors
///
/// Returns an error if the dispatcher cannot be built or the start fails.
pub async fn execute(args: StartArgs, config: &Config) -> Result<()> {
    let policy = WorkflowPolicy::from_env().context("Invalid workflow policy")?;
    let dispatcher = backend::dispatcher(config, &policy).await?;

    let mut event = json!({
        FIELD_INVOCATION_TYPE: "START_BUILD",
        FIELD_ROLE_ARN: args.role,
        FIELD_PROJECT: args.project,
        FIELD_ENVIRONMENT: args.overrides(),
    });
    if let Some(region) = &config.region {
        event[FIELD_REGION] = Value::from(region.as_str());
    }

    let mut output = handle_event(dispatcher.as_ref(), event)
        .await
        .context("Failed to start job")?;
    redact_event(&mut output);

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to serialize response")?
            );
        }
        OutputFormat::Text => {
            println!("Job started");
            println!();
            println!("  Job ID: {}", output[FIELD_JOB_HANDLE].as_str().unwrap_or_default());
            println!("  Status: {}", output[FIELD_JOB_STATUS].as_str().unwrap_or_default());
        }
    }
    Ok(())
}

/// Replaces every secret override value in `event` with the redaction marker.
pub fn redact_event(event: &mut Value) {
    let Some(entries) = event
        .get_mut(FIELD_ENVIRONMENT)
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for entry in entries {
        let secret = serde_json::from_value::<EnvironmentOverride>(entry.clone())
            .is_ok_and(|parsed| parsed.is_secret());
        if secret {
            entry["value"] = Value::from(REDACTED);
        }
    }
}
