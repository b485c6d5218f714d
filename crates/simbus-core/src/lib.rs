//! # simbus-core
//!
//! Foundation types shared by every simbus crate:
//!
//! - **Identity & addressing**: [`ClientIdentifier`], [`Subject`], [`Destination`]
//! - **IDs**: [`CorrelationId`] (UUID v7 string) and the process-local [`ConnectionId`]
//! - **Errors**: [`ValidationError`] and [`TransportError`], the two error kinds
//!   every layer above can raise before or during transport I/O
//! - **Logging**: `tracing` subscriber setup, [`LogContext`] handles, and
//!   capture utilities for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod topic;

pub use errors::{TransportError, TransportOperation, ValidationError};
pub use ids::{ConnectionId, CorrelationId};
pub use logging::LogContext;
pub use topic::{ClientIdentifier, Destination, Subject, SubjectBuilder, join_topic, split_topic};
