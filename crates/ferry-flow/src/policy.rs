//! Retry, polling, and credential policy for workflow runs.
//!
//! Defaults: 3 attempts per dispatcher call, 2s exponential backoff base
//! with multiplier 2, a 20s poll interval, unbounded polling, and 1h
//! credentials. Every value can be overridden from the environment.

use std::time::Duration;

use crate::credentials::{clamp_ttl, DEFAULT_CREDENTIAL_TTL};
use crate::error::{Error, Result};

const ENV_MAX_ATTEMPTS: &str = "FERRY_MAX_ATTEMPTS";
const ENV_BACKOFF_BASE_SECS: &str = "FERRY_BACKOFF_BASE_SECS";
const ENV_BACKOFF_MULTIPLIER: &str = "FERRY_BACKOFF_MULTIPLIER";
const ENV_POLL_INTERVAL_SECS: &str = "FERRY_POLL_INTERVAL_SECS";
const ENV_MAX_POLLS: &str = "FERRY_MAX_POLLS";
const ENV_CREDENTIAL_TTL_SECS: &str = "FERRY_CREDENTIAL_TTL_SECS";

/// Default total attempts per dispatcher call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default backoff before the second attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);
/// Default backoff growth factor.
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
/// Default wait between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Policy applied by the workflow controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPolicy {
    /// Total attempts per dispatcher call, including the first.
    pub max_attempts: u32,
    /// Backoff after the first failed attempt.
    pub backoff_base: Duration,
    /// Backoff growth factor per further attempt.
    pub backoff_multiplier: u32,
    /// Wait between status checks while the job is in progress.
    pub poll_interval: Duration,
    /// Maximum number of in-progress observations before giving up.
    /// `None` polls until the job reaches a terminal status.
    pub max_polls: Option<u32>,
    /// TTL requested for each scoped credential.
    pub credential_ttl: Duration,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
        }
    }
}

impl WorkflowPolicy {
    /// Loads the policy from process environment with strict validation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is present but not a
    /// positive integer.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads the policy with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is present but not a
    /// positive integer or exceeds the supported range.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_attempts = parse_positive_u32_env(&get_env, ENV_MAX_ATTEMPTS, defaults.max_attempts)?;
        let backoff_base = parse_positive_u64_env(
            &get_env,
            ENV_BACKOFF_BASE_SECS,
            defaults.backoff_base.as_secs(),
        )?;
        let backoff_multiplier =
            parse_positive_u32_env(&get_env, ENV_BACKOFF_MULTIPLIER, defaults.backoff_multiplier)?;
        let poll_interval = parse_positive_u64_env(
            &get_env,
            ENV_POLL_INTERVAL_SECS,
            defaults.poll_interval.as_secs(),
        )?;
        let max_polls = match get_env(ENV_MAX_POLLS) {
            None => None,
            Some(_) => Some(parse_positive_u32_env(&get_env, ENV_MAX_POLLS, 1)?),
        };
        let credential_ttl = parse_positive_u64_env(
            &get_env,
            ENV_CREDENTIAL_TTL_SECS,
            defaults.credential_ttl.as_secs(),
        )?;

        Ok(Self {
            max_attempts,
            backoff_base: Duration::from_secs(backoff_base),
            backoff_multiplier,
            poll_interval: Duration::from_secs(poll_interval),
            max_polls,
            credential_ttl: clamp_ttl(Duration::from_secs(credential_ttl)),
        })
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the poll ceiling.
    #[must_use]
    pub const fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    /// Sets the total attempts per dispatcher call.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff base and multiplier.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, multiplier: u32) -> Self {
        self.backoff_base = base;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Returns the wait after failed attempt number `attempt` (1-indexed).
    ///
    /// `backoff_for(1)` is the base; each later attempt multiplies it.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.trim().parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!("{key} must be greater than zero")));
    }
    Ok(parsed)
}

fn parse_positive_u32_env<F>(get_env: &F, key: &str, default: u32) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = parse_positive_u64_env(get_env, key, u64::from(default))?;
    u32::try_from(parsed).map_err(|_| {
        Error::configuration(format!("{key} value {parsed} exceeds supported range"))
    })
}
