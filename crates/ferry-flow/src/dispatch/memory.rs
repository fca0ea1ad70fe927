//! In-memory dispatch backends for testing and simulation.
//!
//! - [`InMemoryJobFacility`]: a [`JobFacility`] whose jobs follow a status
//!   script per job definition
//! - [`ScriptedDispatcher`]: a [`RemoteDispatcher`] that replays queued
//!   results, for driving the workflow controller through exact sequences
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no remote calls
//! - **Single-process only**: Handles are not visible across processes

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    DispatchError, DispatchResult, ExecutionHandle, JobFacility, RemoteDispatcher,
    StatusObservation,
};
use crate::credentials::ScopedCredential;
use crate::error::{Error, Result};
use crate::request::{merge_environment, DelegationTarget, EnvironmentOverride};

/// Status reported by jobs whose definition has no script.
const DEFAULT_SCRIPT: &[&str] = &["SUCCEEDED"];

/// A job started on an [`InMemoryJobFacility`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedJob {
    /// Handle issued for the job.
    pub handle: ExecutionHandle,
    /// Job definition that was started.
    pub job_definition_id: String,
    /// Role of the credential used to start the job.
    pub role: String,
    /// Final environment: static defaults merged with overrides.
    pub environment: Vec<EnvironmentOverride>,
}

#[derive(Debug)]
struct JobRecord {
    started: StartedJob,
    remaining: VecDeque<String>,
    last: String,
}

#[derive(Debug, Default)]
struct FacilityState {
    defaults: HashMap<String, Vec<EnvironmentOverride>>,
    scripts: HashMap<String, Vec<String>>,
    jobs: HashMap<ExecutionHandle, JobRecord>,
    order: Vec<ExecutionHandle>,
    start_failures: VecDeque<DispatchError>,
    status_failures: VecDeque<DispatchError>,
    next_id: u64,
}

/// In-memory job facility.
///
/// Each started job walks its definition's status script one step per
/// status call and then keeps reporting the final entry. Definitions
/// without a script succeed on the first status call.
///
/// ## Example
///
/// ```rust
/// use ferry_flow::dispatch::memory::InMemoryJobFacility;
///
/// let facility = InMemoryJobFacility::new("simulated")
///     .with_status_script("proj-1", ["IN_PROGRESS", "IN_PROGRESS", "SUCCEEDED"]);
/// ```
#[derive(Debug)]
pub struct InMemoryJobFacility {
    name: String,
    state: RwLock<FacilityState>,
}

impl Default for InMemoryJobFacility {
    fn default() -> Self {
        Self::new("in-memory")
    }
}

fn poison_err<T>(_: PoisonError<T>) -> DispatchError {
    DispatchError::permanent("job facility lock poisoned")
}

impl InMemoryJobFacility {
    /// Creates an empty facility.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(FacilityState::default()),
        }
    }

    /// Registers a job definition's static environment.
    #[must_use]
    pub fn with_job_definition(
        self,
        job_definition_id: impl Into<String>,
        defaults: Vec<EnvironmentOverride>,
    ) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.defaults.insert(job_definition_id.into(), defaults);
        }
        self
    }

    /// Sets the status sequence reported by jobs of a definition.
    #[must_use]
    pub fn with_status_script<I, S>(self, job_definition_id: impl Into<String>, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script: Vec<String> = statuses.into_iter().map(Into::into).collect();
        if let Ok(mut state) = self.state.write() {
            state.scripts.insert(job_definition_id.into(), script);
        }
        self
    }

    /// Makes the next start call fail with `err`.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn fail_next_start(&self, err: DispatchError) -> Result<()> {
        self.state
            .write()
            .map_err(|_| lock_error())?
            .start_failures
            .push_back(err);
        Ok(())
    }

    /// Makes the next status call fail with `err`.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn fail_next_status(&self, err: DispatchError) -> Result<()> {
        self.state
            .write()
            .map_err(|_| lock_error())?
            .status_failures
            .push_back(err);
        Ok(())
    }

    /// Returns every started job in start order.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn started_jobs(&self) -> Result<Vec<StartedJob>> {
        let state = self.state.read().map_err(|_| lock_error())?;
        Ok(state
            .order
            .iter()
            .filter_map(|handle| state.jobs.get(handle))
            .map(|record| record.started.clone())
            .collect())
    }
}

fn lock_error() -> Error {
    ferry_core::Error::internal("job facility lock poisoned").into()
}

#[async_trait]
impl JobFacility for InMemoryJobFacility {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        &self,
        credential: &ScopedCredential,
        job_definition_id: &str,
        environment: &[EnvironmentOverride],
    ) -> DispatchResult<Option<ExecutionHandle>> {
        if !credential.is_valid_at(Utc::now()) {
            return Err(DispatchError::transient("credential expired"));
        }

        let mut state = self.state.write().map_err(poison_err)?;
        if let Some(err) = state.start_failures.pop_front() {
            return Err(err);
        }

        state.next_id += 1;
        let id = format!("{job_definition_id}:{:08}", state.next_id);
        let Some(handle) = ExecutionHandle::new(id) else {
            return Ok(None);
        };

        let defaults = state
            .defaults
            .get(job_definition_id)
            .cloned()
            .unwrap_or_default();
        let script = state.scripts.get(job_definition_id).cloned().unwrap_or_else(|| {
            DEFAULT_SCRIPT.iter().map(|s| (*s).to_string()).collect()
        });
        let last = script.last().cloned().unwrap_or_default();

        let record = JobRecord {
            started: StartedJob {
                handle: handle.clone(),
                job_definition_id: job_definition_id.to_string(),
                role: credential.target.role.clone(),
                environment: merge_environment(&defaults, environment),
            },
            remaining: script.into(),
            last,
        };
        state.jobs.insert(handle.clone(), record);
        state.order.push(handle.clone());
        Ok(Some(handle))
    }

    async fn status(
        &self,
        credential: &ScopedCredential,
        handle: &ExecutionHandle,
    ) -> DispatchResult<String> {
        if !credential.is_valid_at(Utc::now()) {
            return Err(DispatchError::transient("credential expired"));
        }

        let mut state = self.state.write().map_err(poison_err)?;
        if let Some(err) = state.status_failures.pop_front() {
            return Err(err);
        }

        let record = state
            .jobs
            .get_mut(handle)
            .filter(|record| record.started.role == credential.target.role)
            .ok_or_else(|| DispatchError::permanent(format!("execution {handle} not found")))?;

        Ok(record
            .remaining
            .pop_front()
            .unwrap_or_else(|| record.last.clone()))
    }
}

/// Dispatcher that replays queued results in order.
///
/// An empty start queue yields a fresh handle; an empty status queue yields
/// a permanent "script exhausted" error.
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
    starts: Mutex<VecDeque<DispatchResult<Option<ExecutionHandle>>>>,
    statuses: Mutex<VecDeque<DispatchResult<StatusObservation>>>,
    seen_overrides: Mutex<Vec<Vec<EnvironmentOverride>>>,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedDispatcher {
    /// Creates a dispatcher with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a start result.
    #[must_use]
    pub fn with_start(self, result: DispatchResult<Option<ExecutionHandle>>) -> Self {
        self.starts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
        self
    }

    /// Queues a start error.
    #[must_use]
    pub fn with_start_error(self, err: DispatchError) -> Self {
        self.with_start(Err(err))
    }

    /// Queues raw status strings, each normalized on replay.
    #[must_use]
    pub fn with_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut queue = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
            for status in statuses {
                queue.push_back(Ok(StatusObservation::from_remote(status)));
            }
        }
        self
    }

    /// Queues a status error.
    #[must_use]
    pub fn with_status_error(self, err: DispatchError) -> Self {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(err));
        self
    }

    /// Returns the number of start calls made.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of status calls made.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Returns the overrides passed to each start call.
    #[must_use]
    pub fn seen_overrides(&self) -> Vec<Vec<EnvironmentOverride>> {
        self.seen_overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RemoteDispatcher for ScriptedDispatcher {
    async fn start_job(
        &self,
        _target: &DelegationTarget,
        job_definition_id: &str,
        overrides: &[EnvironmentOverride],
    ) -> DispatchResult<Option<ExecutionHandle>> {
        let call = self.start_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_overrides
            .lock()
            .map_err(poison_err)?
            .push(overrides.to_vec());

        let next = self.starts.lock().map_err(poison_err)?.pop_front();
        next.unwrap_or_else(|| Ok(ExecutionHandle::new(format!("{job_definition_id}:scripted-{call}"))))
    }

    async fn check_status(
        &self,
        _target: &DelegationTarget,
        _handle: &ExecutionHandle,
    ) -> DispatchResult<StatusObservation> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().map_err(poison_err)?.pop_front();
        next.unwrap_or_else(|| Err(DispatchError::permanent("status script exhausted")))
    }
}
