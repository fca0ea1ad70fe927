//! Redaction helpers.
//!
//! Secret override values and delegated credentials MUST NOT reach logs or
//! failure payloads. [`Redacted`] hides a value from `Debug`/`Display`;
//! [`scrub_secrets`] removes known secret values from free-form text such as
//! remote error messages.

use std::fmt;

/// Placeholder rendered in place of secret material.
pub const REDACTED: &str = "REDACTED";

/// A wrapper that renders as [`REDACTED`] in `Debug` and `Display`.
///
/// The inner value is still reachable through [`Redacted::expose`] for the
/// single place that must hand it to the remote facility.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Wraps a secret value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Returns the wrapped value.
    #[must_use]
    pub const fn expose(&self) -> &T {
        &self.0
    }

    /// Consumes the wrapper, returning the secret value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Redacted<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Returns `text` with every occurrence of any non-empty secret replaced.
///
/// Longer secrets are replaced first so a secret that contains another
/// secret is removed in full.
///
/// Only free-form text passed through this function is scrubbed. Fixed
/// vocabulary emitted next to it (failure kinds, categories, error classes,
/// and the marker itself) is left alone, so a secret that is itself one of
/// those words, or a fragment of one, can still appear in the output.
#[must_use]
pub fn scrub_secrets<S: AsRef<str>>(text: &str, secrets: &[S]) -> String {
    let mut ordered: Vec<&str> = secrets
        .iter()
        .map(AsRef::as_ref)
        .filter(|s| !s.is_empty())
        .collect();
    if ordered.is_empty() {
        return text.to_string();
    }
    ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let mut scrubbed = text.to_string();
    for secret in ordered {
        if scrubbed.contains(secret) {
            scrubbed = scrubbed.replace(secret, REDACTED);
        }
    }
    scrubbed
}
