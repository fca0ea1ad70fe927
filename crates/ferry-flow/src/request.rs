//! Job request data model.
//!
//! A [`JobRequest`] is the immutable input of one workflow instance: where to
//! delegate, which job definition to start, which environment overrides to
//! apply, and an opaque caller context that is echoed back on success.
//!
//! ## Inbound schema
//!
//! ```json
//! {
//!   "delegationTarget": "acct-A/role-X",
//!   "jobDefinitionId": "proj-1",
//!   "environmentOverrides": [{"name": "VAR1", "value": "a", "sensitivity": "PLAINTEXT"}],
//!   "tag": "r1"
//! }
//! ```
//!
//! Every top-level field other than the three control fields becomes the
//! original context (`{"tag": "r1"}` above).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ferry_core::REDACTED;

use crate::error::{Error, Result};

const FIELD_DELEGATION_TARGET: &str = "delegationTarget";
const FIELD_JOB_DEFINITION_ID: &str = "jobDefinitionId";
const FIELD_ENVIRONMENT_OVERRIDES: &str = "environmentOverrides";

/// The remote account/role (and optional region) a workflow delegates into.
///
/// Deserializes from either a bare identifier string or an object
/// `{"role": "...", "region": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "TargetRepr")]
pub struct DelegationTarget {
    /// Opaque identifier of the remote role (e.g. an IAM role ARN).
    pub role: String,
    /// Region the remote job facility lives in, if not the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetRepr {
    Bare(String),
    Full {
        #[serde(alias = "roleArn")]
        role: String,
        #[serde(default)]
        region: Option<String>,
    },
}

impl From<TargetRepr> for DelegationTarget {
    fn from(repr: TargetRepr) -> Self {
        match repr {
            TargetRepr::Bare(role) => Self { role, region: None },
            TargetRepr::Full { role, region } => Self { role, region },
        }
    }
}

impl DelegationTarget {
    /// Creates a target for a role in the default region.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            region: None,
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl From<&str> for DelegationTarget {
    fn from(role: &str) -> Self {
        Self::new(role)
    }
}

impl fmt::Display for DelegationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}@{}", self.role, region),
            None => f.write_str(&self.role),
        }
    }
}

/// Whether an override value may appear in logs and error output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sensitivity {
    /// Safe to log.
    #[default]
    Plaintext,
    /// Never logged or echoed in error output.
    Secret,
}

/// How the remote facility resolves an override value.
///
/// `ParameterStore` and `SecretsManager` values are references the facility
/// resolves at job start; `Plaintext` values are passed as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableType {
    /// Literal value.
    #[default]
    Plaintext,
    /// Name of a parameter-store parameter.
    ParameterStore,
    /// Reference to a secrets-manager secret.
    SecretsManager,
}

impl VariableType {
    /// Returns true for literal values.
    #[must_use]
    pub const fn is_plaintext(&self) -> bool {
        matches!(self, Self::Plaintext)
    }
}

/// One named environment value for the remote job.
///
/// On the wire `type` carries the [`VariableType`] and `sensitivity` the
/// logging [`Sensitivity`]. For compatibility `type` also accepts `SECRET`
/// (a secret literal). Without an explicit `sensitivity`, parameter-store
/// and secrets-manager references are treated as secret.
///
/// `Debug` renders `SECRET` values as `REDACTED`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OverrideRepr")]
pub struct EnvironmentOverride {
    /// Variable name.
    pub name: String,
    /// Variable value, or the reference to resolve.
    pub value: String,
    /// Logging sensitivity of the value.
    pub sensitivity: Sensitivity,
    /// How the remote facility resolves the value.
    #[serde(rename = "type", skip_serializing_if = "VariableType::is_plaintext")]
    pub variable_type: VariableType,
}

#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TypeRepr {
    Plaintext,
    Secret,
    ParameterStore,
    SecretsManager,
}

#[derive(Deserialize)]
struct OverrideRepr {
    name: String,
    value: String,
    #[serde(default)]
    sensitivity: Option<Sensitivity>,
    #[serde(default, rename = "type")]
    variable_type: Option<TypeRepr>,
}

impl From<OverrideRepr> for EnvironmentOverride {
    fn from(repr: OverrideRepr) -> Self {
        let (variable_type, implied) = match repr.variable_type {
            None | Some(TypeRepr::Plaintext) => (VariableType::Plaintext, Sensitivity::Plaintext),
            Some(TypeRepr::Secret) => (VariableType::Plaintext, Sensitivity::Secret),
            Some(TypeRepr::ParameterStore) => (VariableType::ParameterStore, Sensitivity::Secret),
            Some(TypeRepr::SecretsManager) => (VariableType::SecretsManager, Sensitivity::Secret),
        };
        Self {
            name: repr.name,
            value: repr.value,
            sensitivity: repr.sensitivity.unwrap_or(implied),
            variable_type,
        }
    }
}

impl EnvironmentOverride {
    /// Creates a plaintext override.
    #[must_use]
    pub fn plaintext(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitivity: Sensitivity::Plaintext,
            variable_type: VariableType::Plaintext,
        }
    }

    /// Creates a secret override.
    #[must_use]
    pub fn secret(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitivity: Sensitivity::Secret,
            variable_type: VariableType::Plaintext,
        }
    }

    /// Creates an override resolved from a parameter-store parameter.
    #[must_use]
    pub fn parameter_store(name: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: parameter.into(),
            sensitivity: Sensitivity::Secret,
            variable_type: VariableType::ParameterStore,
        }
    }

    /// Creates an override resolved from a secrets-manager secret.
    #[must_use]
    pub fn secrets_manager(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: reference.into(),
            sensitivity: Sensitivity::Secret,
            variable_type: VariableType::SecretsManager,
        }
    }

    /// Returns true if the value must be redacted.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        self.sensitivity == Sensitivity::Secret
    }

    /// Returns the value as it may appear in logs.
    #[must_use]
    pub fn display_value(&self) -> &str {
        if self.is_secret() {
            REDACTED
        } else {
            &self.value
        }
    }
}

impl fmt::Debug for EnvironmentOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentOverride")
            .field("name", &self.name)
            .field("value", &self.display_value())
            .field("sensitivity", &self.sensitivity)
            .field("variable_type", &self.variable_type)
            .finish()
    }
}

/// Immutable input for one workflow instance.
///
/// `C` is the caller's opaque context; the controller never inspects it and
/// returns it unchanged on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest<C = Value> {
    /// Where to delegate.
    pub delegation_target: DelegationTarget,
    /// Which job definition to start.
    pub job_definition_id: String,
    /// Overrides merged over the job's static environment, in order.
    #[serde(default)]
    pub environment_overrides: Vec<EnvironmentOverride>,
    /// Caller-supplied context, echoed back verbatim on success.
    pub original_context: C,
}

impl<C> JobRequest<C> {
    /// Creates a request with no environment overrides.
    #[must_use]
    pub fn new(
        delegation_target: impl Into<DelegationTarget>,
        job_definition_id: impl Into<String>,
        original_context: C,
    ) -> Self {
        Self {
            delegation_target: delegation_target.into(),
            job_definition_id: job_definition_id.into(),
            environment_overrides: Vec::new(),
            original_context,
        }
    }

    /// Appends an environment override.
    #[must_use]
    pub fn with_override(mut self, entry: EnvironmentOverride) -> Self {
        self.environment_overrides.push(entry);
        self
    }

    /// Checks that the request carries everything needed to start a job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty delegation target, an
    /// empty job definition id, or an override without a name.
    pub fn validate(&self) -> Result<()> {
        if self.delegation_target.role.trim().is_empty() {
            return Err(Error::invalid_request("request did not include a delegation target"));
        }
        if self.job_definition_id.trim().is_empty() {
            return Err(Error::invalid_request("request did not include a job definition id"));
        }
        if let Some(index) = self
            .environment_overrides
            .iter()
            .position(|o| o.name.trim().is_empty())
        {
            return Err(Error::invalid_request(format!(
                "environment override at index {index} has an empty name"
            )));
        }
        Ok(())
    }

    /// Returns every secret override value, for scrubbing error text.
    #[must_use]
    pub fn secret_values(&self) -> Vec<&str> {
        self.environment_overrides
            .iter()
            .filter(|o| o.is_secret())
            .map(|o| o.value.as_str())
            .collect()
    }
}

impl JobRequest<Value> {
    /// Parses the inbound request schema.
    ///
    /// The control fields are consumed; every other top-level field forms the
    /// original context object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the payload is not an object or a
    /// control field is missing or malformed.
    pub fn from_inbound(payload: Value) -> Result<Self> {
        let Value::Object(mut fields) = payload else {
            return Err(Error::invalid_request("request payload must be a JSON object"));
        };

        let delegation_target: DelegationTarget =
            take_field(&mut fields, FIELD_DELEGATION_TARGET)?.ok_or_else(|| {
                Error::invalid_request(format!("request did not include {FIELD_DELEGATION_TARGET}"))
            })?;
        let job_definition_id: String = take_field(&mut fields, FIELD_JOB_DEFINITION_ID)?
            .ok_or_else(|| {
                Error::invalid_request(format!("request did not include {FIELD_JOB_DEFINITION_ID}"))
            })?;
        let environment_overrides: Vec<EnvironmentOverride> =
            take_field(&mut fields, FIELD_ENVIRONMENT_OVERRIDES)?.unwrap_or_default();

        let request = Self {
            delegation_target,
            job_definition_id,
            environment_overrides,
            original_context: Value::Object(fields),
        };
        request.validate()?;
        Ok(request)
    }
}

fn take_field<T>(fields: &mut Map<String, Value>, key: &str) -> Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| Error::invalid_request(format!("malformed {key}: {e}"))),
    }
}

/// De-duplicates overrides by name: first-seen position, last value wins.
#[must_use]
pub fn effective_overrides(overrides: &[EnvironmentOverride]) -> Vec<EnvironmentOverride> {
    merge_environment(&[], overrides)
}

/// Merges overrides into a job's static environment.
///
/// Defaults keep their order; an override replaces the default with the same
/// name in place; new names are appended in insertion order; among duplicate
/// override names the last one wins.
#[must_use]
pub fn merge_environment(
    defaults: &[EnvironmentOverride],
    overrides: &[EnvironmentOverride],
) -> Vec<EnvironmentOverride> {
    let mut merged: Vec<EnvironmentOverride> = Vec::with_capacity(defaults.len() + overrides.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in defaults.iter().chain(overrides) {
        if let Some(&position) = index.get(&entry.name) {
            merged[position] = entry.clone();
        } else {
            index.insert(entry.name.clone(), merged.len());
            merged.push(entry.clone());
        }
    }
    merged
}
