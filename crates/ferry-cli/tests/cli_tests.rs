//! End-to-end tests of the CLI commands against the simulated backend.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use ferry_cli::{Cli, Commands};

fn write_requests(contents: &serde_json::Value) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "ferry-cli-{}.json",
        ferry_core::WorkflowId::generate()
    ));
    std::fs::write(&path, contents.to_string()).unwrap();
    path
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    match cli.command {
        Commands::Run(args) => ferry_cli::commands::run::execute(args, &config).await,
        Commands::Start(args) => ferry_cli::commands::start::execute(args, &config).await,
        Commands::Status(args) => ferry_cli::commands::status::execute(args, &config).await,
    }
}

#[tokio::test]
async fn simulated_batch_run_succeeds() {
    let path = write_requests(&json!([
        {
            "delegationTarget": "acct-A/role-X",
            "jobDefinitionId": "proj-1",
            "environmentOverrides": [{"name": "VAR1", "value": "a"}],
            "tag": "r1"
        },
        {
            "delegationTarget": {"roleArn": "acct-B/role-Y", "region": "us-east-2"},
            "jobDefinitionId": "proj-2",
            "environmentOverrides": [{"name": "TOKEN", "value": "s3cr3t", "type": "SECRET"}]
        }
    ]));

    let cli = Cli::parse_from([
        "ferry",
        "--simulate",
        "--format",
        "json",
        "run",
        "--request",
        path.to_str().unwrap(),
    ]);
    let result = run(cli).await;
    let _ = std::fs::remove_file(&path);

    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn invalid_request_file_fails_before_dispatch() {
    let path = write_requests(&json!({"jobDefinitionId": "proj-1"}));

    let cli = Cli::parse_from([
        "ferry",
        "--simulate",
        "run",
        "--request",
        path.to_str().unwrap(),
    ]);
    let err = run(cli).await.expect_err("delegation target is missing");
    let _ = std::fs::remove_file(&path);

    assert!(format!("{err:#}").contains("delegationTarget"));
}

#[tokio::test]
async fn missing_request_file_is_reported() {
    let cli = Cli::parse_from([
        "ferry",
        "--simulate",
        "run",
        "--request",
        "/nonexistent/ferry-requests.json",
    ]);
    let err = run(cli).await.expect_err("file does not exist");
    assert!(err.to_string().contains("Failed to read"));
}

#[tokio::test]
async fn simulated_start_with_secret_succeeds() {
    let cli = Cli::parse_from([
        "ferry",
        "--simulate",
        "start",
        "--role",
        "acct-A/role-X",
        "--project",
        "proj-1",
        "--secret-env",
        "TOKEN=s3cr3t",
    ]);
    assert!(run(cli).await.is_ok());
}
