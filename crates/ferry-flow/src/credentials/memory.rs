//! In-memory credential broker for testing and simulation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use ferry_core::Redacted;

use super::{clamp_ttl, CredentialBroker, DelegationError, ScopedCredential};
use crate::request::DelegationTarget;

/// Broker that mints synthetic credentials without any remote call.
///
/// Targets registered with [`StaticCredentialBroker::deny`] are refused, and
/// [`StaticCredentialBroker::fail_next_unavailable`] injects outages.
#[derive(Debug, Default)]
pub struct StaticCredentialBroker {
    denied: HashSet<String>,
    lifetime: Option<chrono::Duration>,
    unavailable_remaining: AtomicU32,
    calls: AtomicUsize,
}

impl StaticCredentialBroker {
    /// Creates a broker that trusts every target.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses delegation into `role`.
    #[must_use]
    pub fn deny(mut self, role: impl Into<String>) -> Self {
        self.denied.insert(role.into());
        self
    }

    /// Issues credentials with a fixed lifetime instead of the requested TTL.
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Makes the next `count` requests fail as unavailable.
    pub fn fail_next_unavailable(&self, count: u32) {
        self.unavailable_remaining.store(count, Ordering::SeqCst);
    }

    /// Returns the number of `assume` calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_outage(&self) -> bool {
        self.unavailable_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CredentialBroker for StaticCredentialBroker {
    async fn assume(
        &self,
        target: &DelegationTarget,
        ttl: Duration,
    ) -> Result<ScopedCredential, DelegationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.take_outage() {
            return Err(DelegationError::unavailable(target, "simulated credential outage"));
        }
        if self.denied.contains(&target.role) {
            return Err(DelegationError::denied(
                target,
                "trust policy does not permit the caller",
            ));
        }

        let lifetime = self.lifetime.unwrap_or_else(|| {
            chrono::Duration::from_std(clamp_ttl(ttl)).unwrap_or(chrono::Duration::hours(1))
        });
        debug!(target = %target, call, "issuing static credential");

        Ok(ScopedCredential {
            target: target.clone(),
            access_key_id: format!("ASIASTATIC{call:06}"),
            secret_access_key: Redacted::new(format!("static-secret-{call}")),
            session_token: Redacted::new(format!("static-session-{call}")),
            expires_at: Utc::now() + lifetime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::DEFAULT_CREDENTIAL_TTL;
    use crate::dispatch::ErrorClass;

    #[tokio::test]
    async fn issues_credential_for_target() {
        let broker = StaticCredentialBroker::new();
        let target = DelegationTarget::new("acct-A/role-X").with_region("us-east-1");

        let credential = broker.assume(&target, DEFAULT_CREDENTIAL_TTL).await.unwrap();

        assert_eq!(credential.target, target);
        assert!(credential.is_valid_at(Utc::now()));
        assert!(credential.expires_at <= Utc::now() + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn denied_target_is_permanent() {
        let broker = StaticCredentialBroker::new().deny("acct-B/role-Y");

        let err = broker
            .assume(&DelegationTarget::new("acct-B/role-Y"), DEFAULT_CREDENTIAL_TTL)
            .await
            .unwrap_err();

        assert!(matches!(err, DelegationError::Denied { .. }));
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn injected_outages_are_consumed() {
        let broker = StaticCredentialBroker::new();
        broker.fail_next_unavailable(2);
        let target = DelegationTarget::new("acct-A/role-X");

        for _ in 0..2 {
            let err = broker.assume(&target, DEFAULT_CREDENTIAL_TTL).await.unwrap_err();
            assert_eq!(err.class(), ErrorClass::Transient);
        }
        assert!(broker.assume(&target, DEFAULT_CREDENTIAL_TTL).await.is_ok());
        assert_eq!(broker.calls(), 3);
    }
}
