//! # ferry-flow
//!
//! Cross-account build orchestration for the ferry orchestrator.
//!
//! This crate implements the orchestration domain, providing:
//!
//! - **Credential Delegation**: Short-lived credentials scoped to one remote
//!   account/role, obtained fresh or reused only while valid
//! - **Remote Dispatch**: Start a job and read its status in the remote
//!   account, with every failure classified as transient or permanent
//! - **Workflow Control**: A per-request state machine with bounded retries,
//!   exponential backoff, and fixed-interval polling
//!
//! ## Core Concepts
//!
//! - **Job Request**: Delegation target, job definition, environment
//!   overrides, and an opaque caller context
//! - **Execution Handle**: Opaque id of one started remote job
//! - **Outcome**: The original context on success, a failure report otherwise
//!
//! ## Guarantees
//!
//! - **Passthrough**: A successful run returns the caller's context unchanged
//! - **Isolation**: Concurrent runs share no mutable state
//! - **Redaction**: Secret override values never reach logs or failure reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use ferry_flow::credentials::StaticCredentialBroker;
//! use ferry_flow::dispatch::memory::InMemoryJobFacility;
//! use ferry_flow::dispatch::BrokeredDispatcher;
//! use ferry_flow::policy::WorkflowPolicy;
//! use ferry_flow::request::{EnvironmentOverride, JobRequest};
//! use ferry_flow::workflow::WorkflowController;
//! use serde_json::json;
//!
//! # async fn example() {
//! let dispatcher = BrokeredDispatcher::new(
//!     StaticCredentialBroker::new(),
//!     InMemoryJobFacility::new("simulated"),
//! );
//! let controller = WorkflowController::new(dispatcher, WorkflowPolicy::default());
//!
//! let request = JobRequest::new("acct-A/role-X", "proj-1", json!({"tag": "r1"}))
//!     .with_override(EnvironmentOverride::plaintext("VAR1", "a"));
//! let report = controller.run(request).await;
//! assert!(report.is_success());
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cancel;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod outcome;
pub mod policy;
pub mod proxy;
pub mod request;
pub mod workflow;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cancel::{cancellation_pair, CancelHandle, CancellationToken};
    pub use crate::credentials::{CachingBroker, CredentialBroker, StaticCredentialBroker};
    pub use crate::dispatch::{BrokeredDispatcher, ExecutionHandle, RemoteDispatcher};
    pub use crate::error::{Error, Result};
    pub use crate::fanout::{run_all, FanOutSummary};
    pub use crate::outcome::{FailureCategory, FailureKind, FailureReport, WorkflowOutcome};
    pub use crate::policy::WorkflowPolicy;
    pub use crate::request::{DelegationTarget, EnvironmentOverride, JobRequest};
    pub use crate::workflow::WorkflowController;
}
