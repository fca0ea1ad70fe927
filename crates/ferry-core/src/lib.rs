//! # ferry-core
//!
//! Core primitives for the ferry cross-account build orchestrator.
//!
//! This crate provides the foundational types shared by the orchestration
//! and CLI crates:
//!
//! - **Identifiers**: Strongly-typed, sortable workflow IDs
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span constructors
//! - **Redaction**: Wrappers and helpers that keep secrets out of logs
//!
//! ## Crate Boundary
//!
//! `ferry-core` knows nothing about credentials, dispatchers, or remote
//! facilities. Anything with orchestration semantics lives in `ferry-flow`.
//!
//! ## Example
//!
//! ```rust
//! use ferry_core::prelude::*;
//!
//! let id = WorkflowId::generate();
//! let secret = Redacted::new("hunter2".to_string());
//! assert_eq!(format!("{secret}"), "REDACTED");
//! assert!(!id.to_string().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod redaction;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::WorkflowId;
    pub use crate::observability::{LogFormat, init_logging};
    pub use crate::redaction::{REDACTED, Redacted, scrub_secrets};
}

pub use error::{Error, Result};
pub use id::WorkflowId;
pub use observability::{LogFormat, init_logging};
pub use redaction::{REDACTED, Redacted, scrub_secrets};
