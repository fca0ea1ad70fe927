//! Credential reuse within the validity window.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{CredentialBroker, DelegationError, ScopedCredential};
use crate::metrics::FlowMetrics;
use crate::request::DelegationTarget;

/// Default margin before expiry at which a cached credential is refreshed.
pub const DEFAULT_REFRESH_MARGIN: chrono::Duration = chrono::Duration::seconds(60);

/// Broker wrapper that reuses a target's credential while it stays valid.
///
/// A cached credential is returned only if it is still valid for at least
/// the refresh margin; otherwise the inner broker is asked again. Failed
/// requests are never cached.
pub struct CachingBroker<B> {
    inner: B,
    refresh_margin: chrono::Duration,
    cached: Mutex<HashMap<DelegationTarget, ScopedCredential>>,
    metrics: FlowMetrics,
}

impl<B> std::fmt::Debug for CachingBroker<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingBroker")
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

impl<B: CredentialBroker> CachingBroker<B> {
    /// Wraps a broker with the default refresh margin.
    #[must_use]
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            cached: Mutex::new(HashMap::new()),
            metrics: FlowMetrics::new(),
        }
    }

    /// Sets the refresh margin.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: chrono::Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Returns the wrapped broker.
    #[must_use]
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Drops every cached credential.
    pub async fn clear(&self) {
        self.cached.lock().await.clear();
    }
}

#[async_trait]
impl<B: CredentialBroker> CredentialBroker for CachingBroker<B> {
    async fn assume(
        &self,
        target: &DelegationTarget,
        ttl: Duration,
    ) -> Result<ScopedCredential, DelegationError> {
        {
            let mut cached = self.cached.lock().await;
            if let Some(credential) = cached.get(target) {
                if credential.is_valid_for(Utc::now(), self.refresh_margin) {
                    debug!(target = %target, "reusing cached credential");
                    self.metrics.record_credential_request("cached");
                    return Ok(credential.clone());
                }
                cached.remove(target);
            }
        }

        let credential = self.inner.assume(target, ttl).await?;

        if credential.is_valid_for(Utc::now(), self.refresh_margin) {
            self.cached
                .lock()
                .await
                .insert(target.clone(), credential.clone());
        }
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{DEFAULT_CREDENTIAL_TTL, StaticCredentialBroker};
    use std::sync::Arc;

    #[tokio::test]
    async fn reuses_valid_credential() {
        let broker = Arc::new(StaticCredentialBroker::new());
        let caching = CachingBroker::new(broker.clone());
        let target = DelegationTarget::new("acct-A/role-X");

        let first = caching.assume(&target, DEFAULT_CREDENTIAL_TTL).await.unwrap();
        let second = caching.assume(&target, DEFAULT_CREDENTIAL_TTL).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(broker.calls(), 1);
    }

    #[tokio::test]
    async fn caches_per_target() {
        let broker = Arc::new(StaticCredentialBroker::new());
        let caching = CachingBroker::new(broker.clone());

        caching
            .assume(&DelegationTarget::new("acct-A/role-X"), DEFAULT_CREDENTIAL_TTL)
            .await
            .unwrap();
        caching
            .assume(&DelegationTarget::new("acct-B/role-X"), DEFAULT_CREDENTIAL_TTL)
            .await
            .unwrap();

        assert_eq!(broker.calls(), 2);
    }

    #[tokio::test]
    async fn re_requests_credential_inside_refresh_margin() {
        let broker = Arc::new(
            StaticCredentialBroker::new().with_lifetime(chrono::Duration::seconds(30)),
        );
        let caching = CachingBroker::new(broker.clone());
        let target = DelegationTarget::new("acct-A/role-X");

        caching.assume(&target, DEFAULT_CREDENTIAL_TTL).await.unwrap();
        caching.assume(&target, DEFAULT_CREDENTIAL_TTL).await.unwrap();

        assert_eq!(broker.calls(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let broker = Arc::new(StaticCredentialBroker::new());
        broker.fail_next_unavailable(1);
        let caching = CachingBroker::new(broker.clone());
        let target = DelegationTarget::new("acct-A/role-X");

        assert!(caching.assume(&target, DEFAULT_CREDENTIAL_TTL).await.is_err());
        assert!(caching.assume(&target, DEFAULT_CREDENTIAL_TTL).await.is_ok());
        assert_eq!(broker.calls(), 2);
    }

    #[tokio::test]
    async fn clear_forces_new_request() {
        let broker = Arc::new(StaticCredentialBroker::new());
        let caching = CachingBroker::new(broker.clone());
        let target = DelegationTarget::new("acct-A/role-X");

        caching.assume(&target, DEFAULT_CREDENTIAL_TTL).await.unwrap();
        caching.clear().await;
        caching.assume(&target, DEFAULT_CREDENTIAL_TTL).await.unwrap();

        assert_eq!(broker.calls(), 2);
    }
}
