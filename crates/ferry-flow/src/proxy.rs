//! Single-step proxy events.
//!
//! A stateless handler for callers that run their own state machine and
//! only need one remote step per invocation:
//!
//! ```json
//! {"invocationType": "START_BUILD", "roleArn": "...", "codeBuildProject": "proj-1",
//!  "environmentVariables": [{"name": "VAR1", "value": "a", "type": "PLAINTEXT"}]}
//! {"invocationType": "CHECK_STATUS", "roleArn": "...", "jobId": "proj-1:0001"}
//! ```
//!
//! The event is returned with `CodeBuildJobStatus` and `CodeBuildJobId`
//! added; every other field is preserved.

use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::dispatch::{DispatchError, ExecutionHandle, RemoteDispatcher};
use crate::request::{DelegationTarget, EnvironmentOverride};

/// Event field selecting the operation.
pub const FIELD_INVOCATION_TYPE: &str = "invocationType";
/// Event field holding the delegation role.
pub const FIELD_ROLE_ARN: &str = "roleArn";
/// Optional event field holding the remote region.
pub const FIELD_REGION: &str = "region";
/// Event field holding the job definition.
pub const FIELD_PROJECT: &str = "codeBuildProject";
/// Optional event field holding environment overrides.
pub const FIELD_ENVIRONMENT: &str = "environmentVariables";
/// Event field holding the execution handle for status checks.
pub const FIELD_JOB_ID: &str = "jobId";
/// Output field carrying the job status.
pub const FIELD_JOB_STATUS: &str = "CodeBuildJobStatus";
/// Output field carrying the execution handle.
pub const FIELD_JOB_HANDLE: &str = "CodeBuildJobId";

/// Errors returned by [`handle_event`].
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The event is not a JSON object.
    #[error("event must be a JSON object")]
    NotAnObject,

    /// A required field is absent or empty.
    #[error("event did not include {0}")]
    MissingField(&'static str),

    /// A field has the wrong shape.
    #[error("malformed {field}: {message}")]
    Malformed {
        /// Field name.
        field: &'static str,
        /// Parse failure.
        message: String,
    },

    /// The invocation type is not supported.
    #[error("unknown invocationType '{0}'")]
    UnknownInvocation(String),

    /// The dispatcher accepted the start without returning a handle.
    #[error("dispatcher returned no execution handle for {0}")]
    MissingHandle(String),

    /// The dispatcher call failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Operations a proxy event can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationType {
    /// Start a job.
    StartBuild,
    /// Read a job's status.
    CheckStatus,
}

impl FromStr for InvocationType {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START_BUILD" => Ok(Self::StartBuild),
            "CHECK_STATUS" => Ok(Self::CheckStatus),
            other => Err(ProxyError::UnknownInvocation(other.to_string())),
        }
    }
}

/// Handles one proxy event.
///
/// # Errors
///
/// Returns [`ProxyError`] for malformed events, unknown invocation types,
/// and dispatcher failures. Nothing is retried.
#[instrument(skip_all)]
pub async fn handle_event<D>(dispatcher: &D, event: Value) -> Result<Value, ProxyError>
where
    D: RemoteDispatcher + ?Sized,
{
    let Value::Object(mut fields) = event else {
        return Err(ProxyError::NotAnObject);
    };

    let invocation: InvocationType = required_str(&fields, FIELD_INVOCATION_TYPE)?.parse()?;
    let target = target_of(&fields)?;

    match invocation {
        InvocationType::StartBuild => {
            let project = required_str(&fields, FIELD_PROJECT)?.to_string();
            let overrides = overrides_of(&fields)?;

            let handle = dispatcher
                .start_job(&target, &project, &overrides)
                .await?
                .ok_or_else(|| ProxyError::MissingHandle(project.clone()))?;
            info!(project = %project, handle = %handle, "proxy started job");

            fields.insert(FIELD_JOB_STATUS.into(), Value::from("IN_PROGRESS"));
            fields.insert(FIELD_JOB_HANDLE.into(), Value::from(handle.as_str()));
        }
        InvocationType::CheckStatus => {
            let job_id = required_str(&fields, FIELD_JOB_ID)?.to_string();
            let handle =
                ExecutionHandle::new(job_id.clone()).ok_or(ProxyError::MissingField(FIELD_JOB_ID))?;

            let observation = dispatcher.check_status(&target, &handle).await?;
            info!(handle = %handle, status = %observation.remote_status, "proxy checked job");

            fields.insert(
                FIELD_JOB_STATUS.into(),
                Value::from(observation.remote_status),
            );
            fields.insert(FIELD_JOB_HANDLE.into(), Value::from(job_id));
        }
    }

    Ok(Value::Object(fields))
}

fn required_str<'a>(fields: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, ProxyError> {
    match fields.get(key) {
        None | Some(Value::Null) => Err(ProxyError::MissingField(key)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ProxyError::MissingField(key)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ProxyError::Malformed {
            field: key,
            message: "expected a string".into(),
        }),
    }
}

fn target_of(fields: &Map<String, Value>) -> Result<DelegationTarget, ProxyError> {
    let target = DelegationTarget::new(required_str(fields, FIELD_ROLE_ARN)?);
    match fields.get(FIELD_REGION) {
        None | Some(Value::Null) => Ok(target),
        Some(_) => Ok(target.with_region(required_str(fields, FIELD_REGION)?)),
    }
}

fn overrides_of(fields: &Map<String, Value>) -> Result<Vec<EnvironmentOverride>, ProxyError> {
    match fields.get(FIELD_ENVIRONMENT) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| ProxyError::Malformed {
            field: FIELD_ENVIRONMENT,
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::memory::ScriptedDispatcher;
    use crate::dispatch::ErrorClass;
    use serde_json::json;

    #[tokio::test]
    async fn start_build_adds_status_and_handle() {
        let dispatcher = ScriptedDispatcher::new();
        let event = json!({
            "invocationType": "START_BUILD",
            "roleArn": "acct-A/role-X",
            "codeBuildProject": "proj-1",
            "environmentVariables": [{"name": "VAR1", "value": "a", "type": "PLAINTEXT"}],
            "pipelineRun": "r-42"
        });

        let output = handle_event(&dispatcher, event).await.unwrap();

        assert_eq!(output["CodeBuildJobStatus"], json!("IN_PROGRESS"));
        assert_eq!(output["CodeBuildJobId"], json!("proj-1:scripted-1"));
        assert_eq!(output["pipelineRun"], json!("r-42"));
        assert_eq!(
            dispatcher.seen_overrides(),
            vec![vec![EnvironmentOverride::plaintext("VAR1", "a")]]
        );
    }

    #[tokio::test]
    async fn start_build_without_environment_uses_empty_list() {
        let dispatcher = ScriptedDispatcher::new();
        let event = json!({
            "invocationType": "START_BUILD",
            "roleArn": "acct-A/role-X",
            "codeBuildProject": "proj-1",
            "environmentVariables": null
        });

        handle_event(&dispatcher, event).await.unwrap();
        assert_eq!(dispatcher.seen_overrides(), vec![Vec::new()]);
    }

    #[tokio::test]
    async fn check_status_reports_raw_status() {
        let dispatcher = ScriptedDispatcher::new().with_statuses(["TIMED_OUT"]);
        let event = json!({
            "invocationType": "CHECK_STATUS",
            "roleArn": "acct-A/role-X",
            "jobId": "proj-1:0001"
        });

        let output = handle_event(&dispatcher, event).await.unwrap();

        assert_eq!(output["CodeBuildJobStatus"], json!("TIMED_OUT"));
        assert_eq!(output["CodeBuildJobId"], json!("proj-1:0001"));
    }

    #[tokio::test]
    async fn unknown_invocation_is_rejected() {
        let dispatcher = ScriptedDispatcher::new();
        let err = handle_event(
            &dispatcher,
            json!({"invocationType": "STOP_BUILD", "roleArn": "acct-A/role-X"}),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProxyError::UnknownInvocation(ref t) if t == "STOP_BUILD"));
        assert_eq!(dispatcher.start_calls(), 0);
    }

    #[tokio::test]
    async fn missing_fields_are_reported() {
        let dispatcher = ScriptedDispatcher::new();

        let err = handle_event(&dispatcher, json!({"invocationType": "START_BUILD", "roleArn": "r"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::MissingField(FIELD_PROJECT)));

        let err = handle_event(&dispatcher, json!({"invocationType": "CHECK_STATUS", "roleArn": ""}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::MissingField(FIELD_ROLE_ARN)));

        let err = handle_event(&dispatcher, json!({"roleArn": "r"})).await.unwrap_err();
        assert!(matches!(err, ProxyError::MissingField(FIELD_INVOCATION_TYPE)));
    }

    #[tokio::test]
    async fn dispatch_errors_propagate() {
        let dispatcher =
            ScriptedDispatcher::new().with_start_error(DispatchError::permanent("no such project"));
        let err = handle_event(
            &dispatcher,
            json!({"invocationType": "START_BUILD", "roleArn": "r", "codeBuildProject": "p"}),
        )
        .await
        .unwrap_err();

        match err {
            ProxyError::Dispatch(inner) => assert_eq!(inner.class, ErrorClass::Permanent),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_object_event_is_rejected() {
        let dispatcher = ScriptedDispatcher::new();
        let err = handle_event(&dispatcher, json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, ProxyError::NotAnObject));
    }

    #[tokio::test]
    async fn start_build_keeps_parameter_store_type() {
        let dispatcher = ScriptedDispatcher::new();
        let event = json!({
            "invocationType": "START_BUILD",
            "roleArn": "acct-A/role-X",
            "codeBuildProject": "proj-1",
            "environmentVariables": [
                {"name": "DB_URL", "value": "/ssm/db-url", "type": "PARAMETER_STORE"},
                {"name": "VAR1", "value": "a", "type": "PLAINTEXT"}
            ]
        });

        handle_event(&dispatcher, event).await.unwrap();

        let seen = dispatcher.seen_overrides();
        assert_eq!(
            seen,
            vec![vec![
                EnvironmentOverride::parameter_store("DB_URL", "/ssm/db-url"),
                EnvironmentOverride::plaintext("VAR1", "a"),
            ]]
        );
        assert_eq!(
            serde_json::to_value(&seen[0][0]).unwrap()["type"],
            json!("PARAMETER_STORE")
        );
    }
}
