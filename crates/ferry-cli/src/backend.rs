//! Dispatcher construction for the CLI.

use std::sync::Arc;

use anyhow::{Context, Result};

use ferry_flow::credentials::{CachingBroker, StaticCredentialBroker, StsCredentialBroker};
use ferry_flow::dispatch::codebuild::CodeBuildFacility;
use ferry_flow::dispatch::memory::InMemoryJobFacility;
use ferry_flow::dispatch::{BrokeredDispatcher, RemoteDispatcher};
use ferry_flow::policy::WorkflowPolicy;

use crate::Config;

/// Shared dispatcher handle used by every command.
pub type SharedDispatcher = Arc<dyn RemoteDispatcher>;

/// Builds the dispatcher selected by `config`.
///
/// With `--simulate`, credentials are minted locally and every job succeeds
/// on its first status check. Otherwise STS and CodeBuild are used, which
/// requires the `aws` feature.
///
/// # Errors
///
/// Returns an error if the AWS backends are unavailable.
pub async fn dispatcher(config: &Config, policy: &WorkflowPolicy) -> Result<SharedDispatcher> {
    if config.simulate {
        tracing::info!("using simulated credential broker and job facility");
        let dispatcher = BrokeredDispatcher::new(
            CachingBroker::new(StaticCredentialBroker::new()),
            InMemoryJobFacility::new("simulated"),
        )
        .with_credential_ttl(policy.credential_ttl);
        return Ok(Arc::new(dispatcher));
    }

    let broker = StsCredentialBroker::from_env()
        .await
        .context("Failed to create STS credential broker (build with --features aws or pass --simulate)")?;
    let facility = CodeBuildFacility::from_env()
        .await
        .context("Failed to create CodeBuild facility")?;

    let dispatcher = BrokeredDispatcher::new(CachingBroker::new(broker), facility)
        .with_credential_ttl(policy.credential_ttl);
    Ok(Arc::new(dispatcher))
}
