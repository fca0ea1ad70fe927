//! Credential delegation into remote accounts.
//!
//! This module provides:
//!
//! - [`CredentialBroker`]: Trait for obtaining short-lived, scoped credentials
//! - [`ScopedCredential`]: A time-limited credential bound to one target
//! - [`DelegationError`]: Denied vs. unavailable delegation failures
//! - [`CachingBroker`]: Reuses credentials only within their validity window
//! - [`StaticCredentialBroker`]: In-memory broker for testing and simulation
//! - [`StsCredentialBroker`]: STS `AssumeRole` broker (`aws` feature)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ferry_flow::credentials::{CachingBroker, StsCredentialBroker};
//!
//! let broker = CachingBroker::new(StsCredentialBroker::from_env().await?);
//! let credential = broker.assume(&target, DEFAULT_CREDENTIAL_TTL).await?;
//! ```

mod cache;
mod memory;
mod sts;

pub use cache::CachingBroker;
pub use memory::StaticCredentialBroker;
pub use sts::StsCredentialBroker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ferry_core::Redacted;

use crate::dispatch::ErrorClass;
use crate::request::DelegationTarget;

/// Default credential TTL (1 hour).
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(3600);

/// Minimum credential TTL (15 minutes, the shortest STS session).
pub const MIN_CREDENTIAL_TTL: Duration = Duration::from_secs(900);

/// Maximum credential TTL (1 hour for security).
pub const MAX_CREDENTIAL_TTL: Duration = Duration::from_secs(3600);

/// Clamps a TTL to the allowed range.
#[must_use]
pub fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.clamp(MIN_CREDENTIAL_TTL, MAX_CREDENTIAL_TTL)
}

/// A short-lived credential restricted to one delegation target.
///
/// Secret parts render as `REDACTED` in `Debug`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedCredential {
    /// Target the credential was issued for.
    pub target: DelegationTarget,
    /// Access key identifier (not secret).
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: Redacted<String>,
    /// Session token.
    pub session_token: Redacted<String>,
    /// When the credential stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl ScopedCredential {
    /// Returns true if the credential is still valid at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Returns true if the credential remains valid for at least `margin`
    /// after `now`.
    #[must_use]
    pub fn is_valid_for(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin < self.expires_at
    }
}

/// Delegation failures reported by a [`CredentialBroker`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DelegationError {
    /// The target's trust policy does not permit the caller's principal.
    #[error("delegation denied for {target}: {message}")]
    Denied {
        /// Target that refused delegation.
        target: String,
        /// Provider message.
        message: String,
    },

    /// The credential service could not be reached or failed internally.
    #[error("delegation unavailable for {target}: {message}")]
    Unavailable {
        /// Target that was being assumed.
        target: String,
        /// Provider message.
        message: String,
    },
}

impl DelegationError {
    /// Creates a denied error.
    #[must_use]
    pub fn denied(target: &DelegationTarget, message: impl Into<String>) -> Self {
        Self::Denied {
            target: target.to_string(),
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(target: &DelegationTarget, message: impl Into<String>) -> Self {
        Self::Unavailable {
            target: target.to_string(),
            message: message.into(),
        }
    }

    /// Returns the retry class of this failure.
    ///
    /// Infra outages are retryable; trust-policy denials are not.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Denied { .. } => ErrorClass::Permanent,
            Self::Unavailable { .. } => ErrorClass::Transient,
        }
    }
}

/// Trait for obtaining scoped credentials for a delegation target.
///
/// Implementations must not hand out a credential past its validity window;
/// callers re-request instead of reusing an expired credential.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Assumes the target and returns a credential valid for about `ttl`.
    async fn assume(
        &self,
        target: &DelegationTarget,
        ttl: Duration,
    ) -> Result<ScopedCredential, DelegationError>;
}

#[async_trait]
impl<B> CredentialBroker for Arc<B>
where
    B: CredentialBroker + ?Sized,
{
    async fn assume(
        &self,
        target: &DelegationTarget,
        ttl: Duration,
    ) -> Result<ScopedCredential, DelegationError> {
        (**self).assume(target, ttl).await
    }
}
