//! STS `AssumeRole` credential broker.
//!
//! The real implementation is only compiled with the `aws` feature. Without
//! it, a placeholder with the same surface reports a configuration error.

/// Session name recorded on every assumed-role session.
pub const DEFAULT_SESSION_NAME: &str = "ferry-cross-account";

#[cfg(feature = "aws")]
mod aws_impl {
    use std::time::Duration;

    use async_trait::async_trait;
    use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
    use aws_sdk_sts::operation::assume_role::AssumeRoleError;
    use chrono::{DateTime, Utc};
    use tracing::{debug, instrument, warn};

    use ferry_core::Redacted;

    use super::DEFAULT_SESSION_NAME;
    use crate::credentials::{clamp_ttl, CredentialBroker, DelegationError, ScopedCredential};
    use crate::error::Result;
    use crate::metrics::FlowMetrics;
    use crate::request::DelegationTarget;

    /// Error codes meaning the target will never accept this caller.
    const DENIAL_CODES: &[&str] = &[
        "AccessDenied",
        "AccessDeniedException",
        "MalformedPolicyDocument",
        "PackedPolicyTooLarge",
        "RegionDisabledException",
        "ValidationError",
    ];

    /// Broker backed by STS `AssumeRole`.
    #[derive(Debug, Clone)]
    pub struct StsCredentialBroker {
        client: aws_sdk_sts::Client,
        session_name: String,
        metrics: FlowMetrics,
    }

    impl StsCredentialBroker {
        /// Builds a broker from the ambient AWS configuration.
        ///
        /// # Errors
        ///
        /// Never fails with the `aws` feature enabled; the signature matches
        /// the placeholder.
        pub async fn from_env() -> Result<Self> {
            let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .load()
                .await;
            Ok(Self::new(aws_sdk_sts::Client::new(&config)))
        }

        /// Wraps an existing STS client.
        #[must_use]
        pub fn new(client: aws_sdk_sts::Client) -> Self {
            Self {
                client,
                session_name: DEFAULT_SESSION_NAME.to_string(),
                metrics: FlowMetrics::new(),
            }
        }

        /// Overrides the role session name.
        #[must_use]
        pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
            self.session_name = session_name.into();
            self
        }
    }

    #[async_trait]
    impl CredentialBroker for StsCredentialBroker {
        #[instrument(skip(self), fields(target = %target))]
        async fn assume(
            &self,
            target: &DelegationTarget,
            ttl: Duration,
        ) -> std::result::Result<ScopedCredential, DelegationError> {
            let duration_seconds = i32::try_from(clamp_ttl(ttl).as_secs()).unwrap_or(3600);

            let output = self
                .client
                .assume_role()
                .role_arn(&target.role)
                .role_session_name(&self.session_name)
                .duration_seconds(duration_seconds)
                .send()
                .await
                .map_err(|err| {
                    let classified = classify_sts_error(target, &err);
                    warn!(error = %classified, "assume role failed");
                    self.metrics.record_credential_request("error");
                    classified
                })?;

            let credentials = output.credentials().ok_or_else(|| {
                self.metrics.record_credential_request("error");
                DelegationError::unavailable(target, "STS response did not include credentials")
            })?;

            let expires_at = DateTime::<Utc>::from_timestamp(credentials.expiration().secs(), 0)
                .unwrap_or_else(Utc::now);
            debug!(expires_at = %expires_at, "assumed role");
            self.metrics.record_credential_request("issued");

            Ok(ScopedCredential {
                target: target.clone(),
                access_key_id: credentials.access_key_id().to_string(),
                secret_access_key: Redacted::new(credentials.secret_access_key().to_string()),
                session_token: Redacted::new(credentials.session_token().to_string()),
                expires_at,
            })
        }
    }

    fn classify_sts_error(
        target: &DelegationTarget,
        err: &SdkError<AssumeRoleError>,
    ) -> DelegationError {
        let message = DisplayErrorContext(err).to_string();
        match err {
            SdkError::ServiceError(_)
                if err.code().is_some_and(|code| DENIAL_CODES.contains(&code)) =>
            {
                DelegationError::denied(target, message)
            }
            _ => DelegationError::unavailable(target, message),
        }
    }
}

#[cfg(not(feature = "aws"))]
mod placeholder_impl {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::DEFAULT_SESSION_NAME;
    use crate::credentials::{CredentialBroker, DelegationError, ScopedCredential};
    use crate::error::{Error, Result};
    use crate::request::DelegationTarget;

    /// Placeholder broker used when the `aws` feature is disabled.
    #[derive(Debug, Clone)]
    pub struct StsCredentialBroker {
        session_name: String,
    }

    impl StsCredentialBroker {
        /// Always fails: STS support is not compiled in.
        ///
        /// # Errors
        ///
        /// Returns a configuration error directing the caller to enable the
        /// `aws` feature.
        #[allow(clippy::unused_async)]
        pub async fn from_env() -> Result<Self> {
            Err(Error::configuration(
                "STS credential broker requires the 'aws' feature",
            ))
        }

        /// Overrides the role session name.
        #[must_use]
        pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
            self.session_name = session_name.into();
            self
        }
    }

    impl Default for StsCredentialBroker {
        fn default() -> Self {
            Self {
                session_name: DEFAULT_SESSION_NAME.to_string(),
            }
        }
    }

    #[async_trait]
    impl CredentialBroker for StsCredentialBroker {
        async fn assume(
            &self,
            target: &DelegationTarget,
            _ttl: Duration,
        ) -> std::result::Result<ScopedCredential, DelegationError> {
            Err(DelegationError::denied(
                target,
                format!(
                    "session {} cannot be opened: STS support requires the 'aws' feature",
                    self.session_name
                ),
            ))
        }
    }
}

#[cfg(feature = "aws")]
pub use aws_impl::StsCredentialBroker;

#[cfg(not(feature = "aws"))]
pub use placeholder_impl::StsCredentialBroker;

#[cfg(all(test, not(feature = "aws")))]
mod tests {
    use super::*;
    use crate::credentials::{CredentialBroker, DelegationError, DEFAULT_CREDENTIAL_TTL};
    use crate::error::Error;
    use crate::request::DelegationTarget;

    #[tokio::test]
    async fn placeholder_from_env_is_configuration_error() {
        let err = StsCredentialBroker::from_env().await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("aws"));
    }

    #[tokio::test]
    async fn placeholder_assume_is_denied() {
        let broker = StsCredentialBroker::default().with_session_name("test-session");
        let err = broker
            .assume(&DelegationTarget::new("acct-A/role-X"), DEFAULT_CREDENTIAL_TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::Denied { .. }));
        assert!(err.to_string().contains("test-session"));
    }
}
