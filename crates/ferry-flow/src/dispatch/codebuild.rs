//! AWS CodeBuild job facility.
//!
//! Starts builds with `StartBuild` and reads their status with
//! `BatchGetBuilds`, using a client built from the scoped credential of each
//! call. Compiled only with the `aws` feature; otherwise a placeholder with
//! the same surface reports a configuration error.

/// Service error codes that will not succeed on retry.
pub const PERMANENT_ERROR_CODES: &[&str] = &[
    "InvalidInputException",
    "ResourceNotFoundException",
    "AccessDeniedException",
    "AccountLimitExceededException",
];

#[cfg(feature = "aws")]
mod aws_impl {
    use std::time::SystemTime;

    use async_trait::async_trait;
    use aws_sdk_codebuild::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
    use aws_sdk_codebuild::types::{EnvironmentVariable, EnvironmentVariableType};
    use tracing::{debug, instrument};

    use super::PERMANENT_ERROR_CODES;
    use crate::credentials::ScopedCredential;
    use crate::dispatch::{DispatchError, DispatchResult, ExecutionHandle, JobFacility};
    use crate::error::Result;
    use crate::request::{EnvironmentOverride, VariableType};

    const PROVIDER_NAME: &str = "ferry-delegation";

    /// Job facility backed by AWS CodeBuild.
    #[derive(Debug, Clone)]
    pub struct CodeBuildFacility {
        base: aws_config::SdkConfig,
    }

    impl CodeBuildFacility {
        /// Builds a facility from the ambient AWS configuration.
        ///
        /// # Errors
        ///
        /// Never fails with the `aws` feature enabled; the signature matches
        /// the placeholder.
        pub async fn from_env() -> Result<Self> {
            let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .load()
                .await;
            Ok(Self::new(base))
        }

        /// Creates a facility from an explicit SDK configuration.
        #[must_use]
        pub fn new(base: aws_config::SdkConfig) -> Self {
            Self { base }
        }

        fn client_for(&self, credential: &ScopedCredential) -> aws_sdk_codebuild::Client {
            let credentials = aws_sdk_codebuild::config::Credentials::new(
                credential.access_key_id.clone(),
                credential.secret_access_key.expose().clone(),
                Some(credential.session_token.expose().clone()),
                Some(SystemTime::from(credential.expires_at)),
                PROVIDER_NAME,
            );
            let mut builder =
                aws_sdk_codebuild::config::Builder::from(&self.base).credentials_provider(credentials);
            if let Some(region) = &credential.target.region {
                builder = builder.region(aws_sdk_codebuild::config::Region::new(region.clone()));
            }
            aws_sdk_codebuild::Client::from_conf(builder.build())
        }
    }

    #[async_trait]
    impl JobFacility for CodeBuildFacility {
        fn name(&self) -> &str {
            "codebuild"
        }

        #[instrument(skip(self, credential, environment), fields(project = job_definition_id))]
        async fn start(
            &self,
            credential: &ScopedCredential,
            job_definition_id: &str,
            environment: &[EnvironmentOverride],
        ) -> DispatchResult<Option<ExecutionHandle>> {
            let variables = environment
                .iter()
                .map(|entry| {
                    EnvironmentVariable::builder()
                        .name(&entry.name)
                        .value(&entry.value)
                        .r#type(codebuild_type(entry.variable_type))
                        .build()
                        .map_err(|e| {
                            DispatchError::permanent(format!(
                                "invalid environment override {}: {e}",
                                entry.name
                            ))
                        })
                })
                .collect::<DispatchResult<Vec<_>>>()?;

            let output = self
                .client_for(credential)
                .start_build()
                .project_name(job_definition_id)
                .set_environment_variables_override(Some(variables))
                .send()
                .await
                .map_err(classify_codebuild_error)?;

            let handle = output
                .build()
                .and_then(|build| build.id())
                .and_then(ExecutionHandle::new);
            debug!(handle = ?handle, "start_build returned");
            Ok(handle)
        }

        #[instrument(skip(self, credential), fields(handle = %handle))]
        async fn status(
            &self,
            credential: &ScopedCredential,
            handle: &ExecutionHandle,
        ) -> DispatchResult<String> {
            let output = self
                .client_for(credential)
                .batch_get_builds()
                .ids(handle.as_str())
                .send()
                .await
                .map_err(classify_codebuild_error)?;

            let build = output
                .builds()
                .first()
                .ok_or_else(|| DispatchError::permanent(format!("build {handle} not found")))?;
            Ok(build
                .build_status()
                .map_or_else(|| "UNKNOWN".to_string(), |status| status.as_str().to_string()))
        }
    }

    pub(super) fn codebuild_type(variable_type: VariableType) -> EnvironmentVariableType {
        match variable_type {
            VariableType::Plaintext => EnvironmentVariableType::Plaintext,
            VariableType::ParameterStore => EnvironmentVariableType::ParameterStore,
            VariableType::SecretsManager => EnvironmentVariableType::SecretsManager,
        }
    }

    fn classify_codebuild_error<E>(err: SdkError<E>) -> DispatchError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let message = DisplayErrorContext(&err).to_string();
        match &err {
            SdkError::ServiceError(_)
                if err
                    .code()
                    .is_some_and(|code| PERMANENT_ERROR_CODES.contains(&code)) =>
            {
                DispatchError::permanent(message)
            }
            _ => DispatchError::transient(message),
        }
    }
}

#[cfg(not(feature = "aws"))]
mod placeholder_impl {
    use async_trait::async_trait;

    use crate::credentials::ScopedCredential;
    use crate::dispatch::{DispatchError, DispatchResult, ExecutionHandle, JobFacility};
    use crate::error::{Error, Result};
    use crate::request::EnvironmentOverride;

    const UNAVAILABLE: &str = "CodeBuild facility requires the 'aws' feature";

    /// Placeholder facility used when the `aws` feature is disabled.
    #[derive(Debug, Clone, Default)]
    pub struct CodeBuildFacility {
        _private: (),
    }

    impl CodeBuildFacility {
        /// Always fails: CodeBuild support is not compiled in.
        ///
        /// # Errors
        ///
        /// Returns a configuration error directing the caller to enable the
        /// `aws` feature.
        #[allow(clippy::unused_async)]
        pub async fn from_env() -> Result<Self> {
            Err(Error::configuration(UNAVAILABLE))
        }
    }

    #[async_trait]
    impl JobFacility for CodeBuildFacility {
        fn name(&self) -> &str {
            "codebuild"
        }

        async fn start(
            &self,
            _credential: &ScopedCredential,
            _job_definition_id: &str,
            _environment: &[EnvironmentOverride],
        ) -> DispatchResult<Option<ExecutionHandle>> {
            Err(DispatchError::permanent(UNAVAILABLE))
        }

        async fn status(
            &self,
            _credential: &ScopedCredential,
            _handle: &ExecutionHandle,
        ) -> DispatchResult<String> {
            Err(DispatchError::permanent(UNAVAILABLE))
        }
    }
}

#[cfg(feature = "aws")]
pub use aws_impl::CodeBuildFacility;

#[cfg(not(feature = "aws"))]
pub use placeholder_impl::CodeBuildFacility;

#[cfg(all(test, not(feature = "aws")))]
mod tests {
    use super::*;
    use crate::credentials::{CredentialBroker, StaticCredentialBroker, DEFAULT_CREDENTIAL_TTL};
    use crate::dispatch::{ErrorClass, JobFacility};
    use crate::error::Error;
    use crate::request::DelegationTarget;

    #[tokio::test]
    async fn placeholder_from_env_is_configuration_error() {
        let err = CodeBuildFacility::from_env().await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn placeholder_calls_are_permanent() {
        let credential = StaticCredentialBroker::new()
            .assume(&DelegationTarget::new("acct-A/role-X"), DEFAULT_CREDENTIAL_TTL)
            .await
            .unwrap();
        let err = CodeBuildFacility::default()
            .start(&credential, "proj-1", &[])
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Permanent);
    }

    #[test]
    fn permanent_codes_cover_missing_project() {
        assert!(PERMANENT_ERROR_CODES.contains(&"ResourceNotFoundException"));
        assert!(!PERMANENT_ERROR_CODES.contains(&"ThrottlingException"));
    }
}
